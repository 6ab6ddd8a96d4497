// src/main.rs

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::error::Error;

// Response types
#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
}

#[derive(Debug, Deserialize)]
struct BatchReport {
    saved: Vec<String>,
    skipped: Vec<(String, String)>,
    failed: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct Sheet {
    id: u64,
    employee_id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct ClosureStatus {
    can_close: bool,
    rejection: Option<Value>,
    archive: Option<Value>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let base_url = std::env::var("CHANTIER_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());
    let tenant = std::env::args().nth(1).unwrap_or_else(|| "demo".to_string());
    let client = Client::new();

    // Test 1: Health check
    println!("\n🔍 Testing health check endpoint...");
    let health = client
        .get(format!("{}/health", base_url))
        .send()
        .await?
        .json::<HealthResponse>()
        .await?;
    println!("Health check response: {:?}", health);

    // Test 2: Register employees, then save a week for them
    for (id, name, kind) in [("E1", "Ana Ruiz", "permanent"), ("E2", "Bo Lindqvist", "temporary")] {
        let status = client
            .put(format!("{}/api/{}/employees/{}", base_url, tenant, id))
            .json(&json!({ "display_name": name, "kind": kind }))
            .send()
            .await?
            .status();
        println!("Registered {} ({}): {}", id, name, status);
    }

    println!("\n🔍 Saving week 2025-W11 for tenant {}...", tenant);
    let day = |hours: &str| json!({ "hours": hours, "meal": true, "trip_code": "ZONE_1A" });
    let payload = json!({
        "supervisor_id": "S1",
        "worksite": "CH-01",
        "employees": [
            {
                "employee_id": "E1",
                "days": {
                    "monday": day("8"), "tuesday": day("8"), "wednesday": day("8"),
                    "thursday": day("8"), "friday": day("7")
                }
            },
            {
                "employee_id": "E2",
                "days": { "monday": { "absent": true, "absence_type": "sickness" } }
            }
        ]
    });
    let report = client
        .put(format!("{}/api/{}/weeks/2025-W11/days", base_url, tenant))
        .json(&payload)
        .send()
        .await?
        .json::<BatchReport>()
        .await?;
    println!(
        "Saved: {:?}, skipped: {:?}, failed: {}",
        report.saved,
        report.skipped,
        report.failed.len()
    );

    // Test 3: Move the week's sheets through validation to HR
    println!("\n🔍 Advancing week 2025-W11 sheets to HR...");
    let sheets = client
        .get(format!("{}/api/{}/weeks/2025-W11/sheets", base_url, tenant))
        .send()
        .await?
        .json::<Vec<Sheet>>()
        .await?;
    for sheet in sheets.iter().filter(|s| s.status == "DRAFT") {
        for target in ["SUPERVISOR_VALIDATED", "SENT_TO_HR"] {
            let response = client
                .put(format!("{}/api/{}/sheets/{}/status", base_url, tenant, sheet.id))
                .json(&json!({ "status": target }))
                .send()
                .await?;
            println!(
                "Sheet {} ({}) -> {}: {}",
                sheet.id,
                sheet.employee_id,
                target,
                response.status()
            );
        }
    }

    // Test 4: Consolidation preview
    println!("\n🔍 Fetching March 2025 consolidation...");
    let consolidation = client
        .get(format!("{}/api/{}/periods/2025-03/consolidation", base_url, tenant))
        .send()
        .await?
        .json::<Value>()
        .await?;
    println!(
        "{}",
        serde_json::to_string_pretty(&consolidation["rows"]).unwrap_or_default()
    );

    // Test 5: Closure status and attempt
    println!("\n🔍 Checking closure status...");
    let status = client
        .get(format!("{}/api/{}/periods/2025-03/closure", base_url, tenant))
        .send()
        .await?
        .json::<ClosureStatus>()
        .await?;
    println!(
        "Can close: {} (rejection: {:?}, archived: {})",
        status.can_close,
        status.rejection,
        status.archive.is_some()
    );

    println!("\n🔍 Attempting to close 2025-03...");
    let response = client
        .post(format!("{}/api/{}/periods/2025-03/closure", base_url, tenant))
        .json(&json!({ "closed_by": "smoke-test", "note": "smoke test run" }))
        .send()
        .await?;
    match response.status() {
        StatusCode::CREATED => println!("✅ Closed: {}", response.text().await?),
        StatusCode::CONFLICT => println!("⚠️ Not closed: {}", response.text().await?),
        other => println!("❌ Unexpected status {}: {}", other, response.text().await?),
    }

    println!("\n✅ Smoke test finished");
    Ok(())
}
