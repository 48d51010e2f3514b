//! Demo analyzers and tools for exercising the engine from the CLI.
//!
//! Everything here is synthetic: tools derive stable pseudo-data from the
//! entity id, analyzers turn it into findings. Useful for trying out loop
//! bounds, whitelist stripping, and circuit breaking without real backends.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use inquest_core::agents::{AgentToolbox, DomainAnalyzer, RawFindings};
use inquest_core::state::{Domain, InvestigationState, JsonMap};
use inquest_core::tools::{Tool, ToolCategory, ToolOutcome};
use inquest_core::whitelist::WhitelistPolicy;

pub fn whitelist() -> WhitelistPolicy {
    WhitelistPolicy::builder()
        .domain("network", ["ip_count", "asn", "proxy_detected"])
        .domain("device", ["fingerprint", "device_age_days"])
        .domain("velocity", ["tx_per_hour", "burst_detected"])
        .forbid(["ssn", "full_card_number", "password_hash"])
        .build()
}

pub fn tools() -> Vec<Arc<dyn Tool>> {
    vec![Arc::new(EntityProfileTool), Arc::new(IpIntelTool)]
}

pub fn analyzers() -> Vec<Arc<dyn DomainAnalyzer>> {
    vec![
        Arc::new(NetworkAnalyzer),
        Arc::new(DeviceAnalyzer),
        Arc::new(VelocityAnalyzer),
    ]
}

/// Stable small hash of the entity id so demo output is reproducible.
fn seed_from(params: &Value) -> u64 {
    let id = params
        .pointer("/entity/value")
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    id.bytes().fold(0u64, |acc, b| {
        acc.wrapping_mul(31).wrapping_add(u64::from(b))
    })
}

struct EntityProfileTool;

#[async_trait]
impl Tool for EntityProfileTool {
    fn name(&self) -> &str {
        "entity_profile"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Lookup
    }

    async fn execute(&self, params: Value) -> anyhow::Result<Value> {
        let seed = seed_from(&params);
        Ok(json!({
            "account_age_days": seed % 900,
            "prior_reports": seed % 4,
        }))
    }
}

struct IpIntelTool;

#[async_trait]
impl Tool for IpIntelTool {
    fn name(&self) -> &str {
        "ip_intel"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Enrichment
    }

    async fn execute(&self, params: Value) -> anyhow::Result<Value> {
        let seed = seed_from(&params);
        Ok(json!({
            "distinct_ips": seed % 9 + 1,
            "asn": 64512 + (seed % 128),
            "proxy": seed % 5 == 0,
        }))
    }
}

struct NetworkAnalyzer;

#[async_trait]
impl DomainAnalyzer for NetworkAnalyzer {
    fn domain(&self) -> Domain {
        Domain::from("network")
    }

    async fn analyze(
        &self,
        snapshot: &InvestigationState,
        tools: &AgentToolbox,
    ) -> anyhow::Result<RawFindings> {
        let outcome = tools
            .call("ip_intel", json!({ "entity": snapshot.entity }))
            .await;
        let intel = match outcome {
            ToolOutcome::Ok(value) => value,
            ToolOutcome::SoftFailure(reason) => anyhow::bail!("ip_intel failed: {reason}"),
            ToolOutcome::CircuitOpen => anyhow::bail!("ip_intel circuit open"),
        };

        let ip_count = intel["distinct_ips"].as_u64().unwrap_or(1);
        let proxy = intel["proxy"].as_bool().unwrap_or(false);
        let mut metrics = JsonMap::new();
        metrics.insert("ip_count".to_string(), json!(ip_count));
        metrics.insert("asn".to_string(), intel["asn"].clone());
        metrics.insert("proxy_detected".to_string(), json!(proxy));

        let mut evidence = vec![format!("{ip_count} distinct IPs in window")];
        if proxy {
            evidence.push("anonymizing proxy detected".to_string());
        }

        Ok(RawFindings {
            risk_score: (ip_count as f64 / 10.0 + if proxy { 0.3 } else { 0.0 }).min(1.0),
            confidence: 0.85,
            evidence,
            metrics,
        })
    }
}

struct DeviceAnalyzer;

#[async_trait]
impl DomainAnalyzer for DeviceAnalyzer {
    fn domain(&self) -> Domain {
        Domain::from("device")
    }

    async fn analyze(
        &self,
        snapshot: &InvestigationState,
        tools: &AgentToolbox,
    ) -> anyhow::Result<RawFindings> {
        let outcome = tools
            .call("entity_profile", json!({ "entity": snapshot.entity }))
            .await;
        let profile = match outcome {
            ToolOutcome::Ok(value) => value,
            ToolOutcome::SoftFailure(reason) => anyhow::bail!("entity_profile failed: {reason}"),
            ToolOutcome::CircuitOpen => anyhow::bail!("entity_profile circuit open"),
        };

        let age = profile["account_age_days"].as_u64().unwrap_or(0);
        let mut metrics = JsonMap::new();
        metrics.insert(
            "fingerprint".to_string(),
            json!(format!("fp_{:08x}", age.wrapping_mul(2_654_435_761))),
        );
        metrics.insert("device_age_days".to_string(), json!(age));

        Ok(RawFindings {
            // Young accounts score higher.
            risk_score: (1.0 - age as f64 / 900.0).clamp(0.0, 1.0) * 0.6,
            confidence: 0.7,
            evidence: vec![format!("account age {age} days")],
            metrics,
        })
    }
}

struct VelocityAnalyzer;

#[async_trait]
impl DomainAnalyzer for VelocityAnalyzer {
    fn domain(&self) -> Domain {
        Domain::from("velocity")
    }

    async fn analyze(
        &self,
        snapshot: &InvestigationState,
        _tools: &AgentToolbox,
    ) -> anyhow::Result<RawFindings> {
        // No external tool: derive velocity from the entity id alone.
        let seed = snapshot
            .entity
            .value
            .bytes()
            .fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(u64::from(b)));
        let tx_per_hour = seed % 40;
        let burst = tx_per_hour > 25;

        let mut metrics = JsonMap::new();
        metrics.insert("tx_per_hour".to_string(), json!(tx_per_hour));
        metrics.insert("burst_detected".to_string(), json!(burst));

        Ok(RawFindings {
            risk_score: (tx_per_hour as f64 / 40.0).min(1.0),
            confidence: 0.6,
            evidence: vec![format!("{tx_per_hour} transactions per hour")],
            metrics,
        })
    }
}
