//! Vital sign simulator
//!
//! Usage: simulator [PATIENTS] [ROUNDS] [DELAY_MS]
//!
//! Posts one round of readings per patient to `/ingest` every DELAY_MS and
//! reports ingest latency at the end.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use vitalwatch::data::{PatientRecord, RecordType};
use vitalwatch::ingest::format_line;

/// Random walk around healthy baselines, with occasional deterioration
struct SimulatedPatient {
    id: i64,
    saturation: f64,
    systolic: f64,
    diastolic: f64,
    ecg_phase: f64,
}

impl SimulatedPatient {
    fn new(id: i64, rng: &mut StdRng) -> Self {
        Self {
            id,
            saturation: rng.gen_range(95.0..99.0),
            systolic: rng.gen_range(110.0..130.0),
            diastolic: rng.gen_range(70.0..85.0),
            ecg_phase: rng.gen_range(0.0..std::f64::consts::TAU),
        }
    }

    fn step(&mut self, rng: &mut StdRng, timestamp: i64) -> Vec<PatientRecord> {
        // Drift back towards baseline so runs stay plausible
        self.saturation += rng.gen_range(-0.8..0.8) + (97.0 - self.saturation) * 0.1;
        self.systolic += rng.gen_range(-4.0..4.0) + (120.0 - self.systolic) * 0.1;
        self.diastolic += rng.gen_range(-3.0..3.0) + (78.0 - self.diastolic) * 0.1;
        self.ecg_phase += 0.7;

        if rng.gen_bool(0.02) {
            self.saturation -= rng.gen_range(4.0..8.0);
            self.systolic -= rng.gen_range(15.0..30.0);
        }

        let saturation = self.saturation.clamp(70.0, 100.0).round();
        // Positive baseline with a small ripple; rare beats spike well above it
        let mut ecg = 1.0 + self.ecg_phase.sin() * 0.05 + rng.gen_range(-0.02..0.02);
        if rng.gen_bool(0.01) {
            ecg *= rng.gen_range(1.8..2.5);
        }

        vec![
            PatientRecord::new(self.id, saturation, RecordType::Saturation, timestamp),
            PatientRecord::new(self.id, saturation, RecordType::BloodSaturation, timestamp),
            PatientRecord::new(self.id, self.systolic.round(), RecordType::SystolicPressure, timestamp),
            PatientRecord::new(self.id, self.diastolic.round(), RecordType::DiastolicPressure, timestamp),
            PatientRecord::new(self.id, (ecg * 1000.0).round() / 1000.0, RecordType::Ecg, timestamp),
        ]
    }
}

struct IngestTimings {
    lines: usize,
    total_duration: Duration,
    latencies: Vec<Duration>,
}

impl IngestTimings {
    fn lines_per_sec(&self) -> f64 {
        self.lines as f64 / self.total_duration.as_secs_f64()
    }

    fn percentile(&self, pct: usize) -> Duration {
        let mut sorted = self.latencies.clone();
        sorted.sort();
        sorted
            .get(sorted.len() * pct / 100)
            .or(sorted.last())
            .copied()
            .unwrap_or_default()
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    let patients: i64 = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(10);
    let rounds: usize = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(60);
    let delay_ms: u64 = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(1000);
    let host = std::env::var("VITALWATCH_HOST").unwrap_or_else(|_| "localhost".to_string());
    let port = std::env::var("VITALWATCH_PORT").unwrap_or_else(|_| "8080".to_string());
    let base_url = format!("http://{}:{}", host, port);

    println!("vitalwatch simulator");
    println!("====================");
    println!("Target:    {}", base_url);
    println!("Patients:  {}", patients);
    println!("Rounds:    {}", rounds);
    println!("Delay:     {}ms", delay_ms);
    println!();

    let client = Client::new();
    let mut rng = StdRng::seed_from_u64(12345);
    let mut population: Vec<SimulatedPatient> = (1..=patients)
        .map(|id| SimulatedPatient::new(id, &mut rng))
        .collect();

    let mut timings = IngestTimings {
        lines: 0,
        total_duration: Duration::ZERO,
        latencies: Vec::with_capacity(rounds),
    };
    let mut rejected = 0u64;
    let start = Instant::now();

    for _ in 0..rounds {
        let timestamp = chrono::Utc::now().timestamp_millis();
        let lines: Vec<String> = population
            .iter_mut()
            .flat_map(|p| p.step(&mut rng, timestamp))
            .map(|r| format_line(&r))
            .collect();

        let batch_start = Instant::now();
        let response = client
            .post(format!("{}/ingest", base_url))
            .json(&json!({ "lines": lines }))
            .send()
            .await?;

        if !response.status().is_success() {
            eprintln!("Error: {}", response.text().await?);
            return Ok(());
        }
        timings.latencies.push(batch_start.elapsed());
        timings.lines += lines.len();

        let report: Value = response.json().await?;
        rejected += report["rejected"].as_u64().unwrap_or(0);

        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }
    timings.total_duration = start.elapsed();

    println!("Sent {} lines ({} rejected)", timings.lines, rejected);
    println!("  Lines/sec:   {:.0}", timings.lines_per_sec());
    println!(
        "  Latency:     p50={:?} p99={:?}",
        timings.percentile(50),
        timings.percentile(99)
    );
    println!();

    // Alerts raised while the simulation ran
    let resp: Value = client
        .get(format!("{}/alerts", base_url))
        .send()
        .await?
        .json()
        .await?;

    if let Some(alerts) = resp["alerts"].as_array() {
        println!("Alerts recorded: {}", alerts.len());
        for alert in alerts.iter().rev().take(10) {
            println!(
                "  patient {}: {}",
                alert["patient_id"],
                alert["description"].as_str().unwrap_or("?")
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use vitalwatch::alerts::{AlertRule, EcgAnomaly};

    #[test]
    fn test_ecg_baseline_rarely_trips_anomaly_rule() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut patient = SimulatedPatient::new(1, &mut rng);
        let rule = EcgAnomaly::default();
        let mut window = Vec::new();
        let mut fired = 0;

        for step in 0..500 {
            let ts = 1_000 * (step + 1);
            let ecg = patient
                .step(&mut rng, ts)
                .into_iter()
                .find(|r| r.record_type == RecordType::Ecg)
                .unwrap();
            assert!(ecg.value > 0.0);
            window.push(ecg);
            if rule.evaluate(1, &window).is_some() {
                fired += 1;
            }
        }

        assert!(fired < 25, "anomaly fired {} times in 500 readings", fired);
    }
}
