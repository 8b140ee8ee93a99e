// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `floodgate status` command - Query a running server.

use serde_json::Value;

pub async fn execute(url: &str) -> Result<(), Box<dyn std::error::Error>> {
    let endpoint = format!("{}/report", url.trim_end_matches('/'));
    tracing::debug!(endpoint = %endpoint, "Fetching report");

    let report: Value = reqwest::get(&endpoint)
        .await?
        .error_for_status()?
        .json()
        .await?;

    let state = &report["state"];
    let metrics = &state["metrics"];

    println!("Run #{} [{}]", state["run_id"], text(&state["status"]));
    let config = &state["config"];
    let source = match text(&config["source_mode"]).as_str() {
        "synthetic" => format!("synthetic ({} bytes)", config["synthetic_size_bytes"]),
        _ => format!("{}/{}", text(&config["mount_path"]), text(&config["model_file"])),
    };
    println!("  Source:       {}", source);
    println!(
        "  Transferred:  {} bytes in {} chunks",
        metrics["total_bytes"], metrics["chunks_transferred"]
    );
    println!("  Files:        {}", metrics["files_processed"]);
    println!(
        "  Throughput:   {:.2} MB/s",
        metrics["throughput_mb_s"].as_f64().unwrap_or_default()
    );
    println!(
        "  Duration:     {:.2} s",
        metrics["duration_sec"].as_f64().unwrap_or_default()
    );
    println!(
        "  Device:       {:.3} GB used, {} failures",
        metrics["vram_used_gb"].as_f64().unwrap_or_default(),
        metrics["device_failures"]
    );
    if metrics["cancelled"].as_bool().unwrap_or(false) {
        println!("  Cancelled:    yes");
    }
    if let Some(error) = state["error"].as_str() {
        println!("  Error:        {}", error);
    }

    Ok(())
}

fn text(value: &Value) -> String {
    value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string())
}
