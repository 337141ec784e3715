// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use m2mstream::scheduler::RunSummary;
use serde::Serialize;
use std::time::Duration;

/// Performance metrics of a completed run
#[derive(Debug, Clone, Serialize)]
pub struct RunMetrics {
    /// Frames delivered by the capture queue
    pub frames: u64,
    /// Payload bytes delivered by the capture queue
    pub capture_bytes: u64,
    /// Output buffers refilled from the input
    pub output_buffers: u64,
    /// Bytes supplied to the output queue
    pub output_bytes: u64,
    /// Source change events handled
    pub source_changes: u64,
    /// End-of-stream events seen
    pub end_of_stream: u64,
    /// Readiness waits that returned work
    pub wait_rounds: u64,
    /// Total duration in milliseconds
    pub duration_ms: u64,
    /// Average throughput in frames per second
    pub throughput_fps: f64,
    /// Average capture bandwidth in megabits per second
    pub bandwidth_mbps: f64,
}

impl RunMetrics {
    pub fn new(summary: &RunSummary, elapsed: Duration) -> Self {
        let duration_secs = elapsed.as_secs_f64();

        let throughput_fps = if duration_secs > 0.0 {
            summary.frames as f64 / duration_secs
        } else {
            0.0
        };

        let bandwidth_mbps = if duration_secs > 0.0 {
            (summary.capture_bytes as f64 * 8.0) / (duration_secs * 1_000_000.0)
        } else {
            0.0
        };

        RunMetrics {
            frames: summary.frames,
            capture_bytes: summary.capture_bytes,
            output_buffers: summary.output_buffers,
            output_bytes: summary.output_bytes,
            source_changes: summary.source_changes,
            end_of_stream: summary.end_of_stream,
            wait_rounds: summary.wait_rounds,
            duration_ms: elapsed.as_millis() as u64,
            throughput_fps,
            bandwidth_mbps,
        }
    }

    /// Print metrics in human-readable format
    pub fn print_text(&self) {
        println!("\n=== Run Metrics ===");
        println!("Frames captured:   {}", self.frames);
        println!(
            "Capture bytes:     {} ({:.2} MB)",
            self.capture_bytes,
            self.capture_bytes as f64 / 1_048_576.0
        );
        if self.output_buffers > 0 || self.output_bytes > 0 {
            println!("Output buffers:    {}", self.output_buffers);
            println!("Output bytes:      {}", self.output_bytes);
        }
        println!("Duration:          {:.2} s", self.duration_ms as f64 / 1000.0);
        println!("Throughput:        {:.2} fps", self.throughput_fps);
        println!("Bandwidth:         {:.2} Mbps", self.bandwidth_mbps);
        println!("Wait rounds:       {}", self.wait_rounds);

        if self.source_changes > 0 {
            println!("Source changes:    {}", self.source_changes);
        }
        if self.end_of_stream > 0 {
            println!("End of stream:     {}", self.end_of_stream);
        }
    }

    /// Print metrics in JSON format
    pub fn print_json(&self) -> Result<(), serde_json::Error> {
        let json = serde_json::to_string_pretty(self)?;
        println!("{}", json);
        Ok(())
    }
}
