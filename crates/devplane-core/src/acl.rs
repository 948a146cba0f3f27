//! C9 — Network/ACL Engine.
//!
//! Computes a concrete, ordered rule list from a preset and installs it on
//! a DevBox's network namespace via the hypervisor adapter.
//! `expand` is a pure function — entirely unit-testable without touching
//! the hypervisor; `NetworkAclEngine::apply` is the one place that talks to
//! the adapter, and it does so atomically: the full rule set is synthesized
//! first, then installed in one call.

use std::sync::Arc;

use devplane_types::models::{AclPreset, AclRule, NetworkAcl, RuleAction};
use devplane_types::AppResult;

use crate::adapters::hypervisor::HypervisorAdapter;

/// The proxy's source IP, used to scope FULL_ISOLATION's ingress allow rule
/// to "only the reverse proxy may reach the app port".
#[derive(Debug, Clone)]
pub struct AclContext {
    pub proxy_source_ip: String,
    pub app_port: Option<u16>,
}

/// Expands a preset into a concrete, ordered rule set.
/// `overrides` is only consulted for `AclPreset::Custom`, where it is
/// stored verbatim.
pub fn expand(preset: AclPreset, ctx: &AclContext, overrides: Option<(Vec<AclRule>, Vec<AclRule>)>) -> NetworkAcl {
    match preset {
        AclPreset::FullIsolation => {
            let mut ingress = Vec::new();
            if let Some(port) = ctx.app_port {
                ingress.push(AclRule {
                    action: RuleAction::Allow,
                    source: Some(ctx.proxy_source_ip.clone()),
                    destination: None,
                    destination_port: Some(port),
                    protocol: Some(devplane_types::models::Protocol::Tcp),
                    description: "allow published app port from reverse proxy".to_string(),
                });
            }
            ingress.push(deny_all("deny all other ingress"));

            let egress = vec![
                allow_port(53, devplane_types::models::Protocol::Udp, "allow DNS"),
                allow_port(53, devplane_types::models::Protocol::Tcp, "allow DNS (TCP fallback)"),
                allow_port(443, devplane_types::models::Protocol::Tcp, "allow HTTPS to the open internet"),
                AclRule {
                    action: RuleAction::Deny,
                    source: None,
                    destination: Some("10.0.0.0/8".to_string()),
                    destination_port: None,
                    protocol: None,
                    description: "deny east-west to other DevBoxes".to_string(),
                },
                allow_all("allow remaining egress"),
            ];

            NetworkAcl { preset, ingress, egress }
        }
        AclPreset::HttpOnly => {
            let ingress = vec![
                allow_port(80, devplane_types::models::Protocol::Tcp, "allow HTTP from anywhere"),
                allow_port(443, devplane_types::models::Protocol::Tcp, "allow HTTPS from anywhere"),
                deny_all("deny other ingress"),
            ];
            let egress = vec![allow_all("allow all egress")];
            NetworkAcl { preset, ingress, egress }
        }
        AclPreset::Permissive => NetworkAcl {
            preset,
            ingress: vec![allow_all("allow all ingress")],
            egress: vec![allow_all("allow all egress")],
        },
        AclPreset::Custom => {
            let (ingress, egress) = overrides.unwrap_or_default();
            NetworkAcl { preset, ingress, egress }
        }
    }
}

fn allow_all(description: &str) -> AclRule {
    AclRule { action: RuleAction::Allow, source: None, destination: None, destination_port: None, protocol: None, description: description.to_string() }
}

fn deny_all(description: &str) -> AclRule {
    AclRule { action: RuleAction::Deny, source: None, destination: None, destination_port: None, protocol: None, description: description.to_string() }
}

fn allow_port(port: u16, protocol: devplane_types::models::Protocol, description: &str) -> AclRule {
    AclRule {
        action: RuleAction::Allow,
        source: None,
        destination: None,
        destination_port: Some(port),
        protocol: Some(protocol),
        description: description.to_string(),
    }
}

/// Evaluates `acl` against a candidate packet description: ordered,
/// first-match-wins, with an implicit final deny.
pub fn evaluate_ingress(acl: &NetworkAcl, source_ip: &str, port: u16, protocol: devplane_types::models::Protocol) -> RuleAction {
    for rule in &acl.ingress {
        if rule_matches(rule, Some(source_ip), None, Some(port), Some(protocol)) {
            return rule.action;
        }
    }
    RuleAction::Deny
}

fn rule_matches(
    rule: &AclRule,
    source_ip: Option<&str>,
    dest_ip: Option<&str>,
    port: Option<u16>,
    protocol: Option<devplane_types::models::Protocol>,
) -> bool {
    if let Some(expected) = &rule.source {
        if source_ip != Some(expected.as_str()) {
            return false;
        }
    }
    if let Some(expected) = &rule.destination {
        if dest_ip != Some(expected.as_str()) {
            return false;
        }
    }
    if let Some(expected) = rule.destination_port {
        if port != Some(expected) {
            return false;
        }
    }
    if let Some(expected) = rule.protocol {
        if protocol != Some(expected) {
            return false;
        }
    }
    true
}

/// Installs a preset's expanded rule set on a DevBox. Atomic from the
/// client's perspective: synthesize, then one adapter call; a failure
/// leaves the previously-installed ACL in place (the adapter call either
/// fully lands or the hypervisor's own config transaction rejects it whole).
pub struct NetworkAclEngine {
    hypervisor: Arc<dyn HypervisorAdapter>,
}

impl NetworkAclEngine {
    pub fn new(hypervisor: Arc<dyn HypervisorAdapter>) -> Self {
        Self { hypervisor }
    }

    pub async fn apply(
        &self,
        container_name: &str,
        preset: AclPreset,
        ctx: &AclContext,
        overrides: Option<(Vec<AclRule>, Vec<AclRule>)>,
    ) -> AppResult<NetworkAcl> {
        let acl = expand(preset, ctx, overrides);
        self.install(container_name, &acl).await?;
        Ok(acl)
    }

    async fn install(&self, container_name: &str, acl: &NetworkAcl) -> AppResult<()> {
        let script = render_nft_script(acl);
        const RULESET_PATH: &str = "/run/devplane-acl.nft";
        self.hypervisor.write_file(container_name, RULESET_PATH, script.as_bytes(), 0o600).await?;
        self.hypervisor
            .exec(container_name, &["nft".to_string(), "-f".to_string(), RULESET_PATH.to_string()])
            .await
            .map(|_| ())
    }
}

/// Renders an `NetworkAcl` into an `nftables` ruleset. Kept separate from
/// `install` so it's unit-testable without a hypervisor.
fn render_nft_script(acl: &NetworkAcl) -> String {
    let mut out = String::from("table inet devplane {\n  chain ingress {\n    type filter hook input priority 0;\n");
    for rule in &acl.ingress {
        out.push_str(&format!("    # {}\n", rule.description));
        out.push_str(&format!("    {}\n", render_nft_rule(rule)));
    }
    out.push_str("    drop\n  }\n  chain egress {\n    type filter hook output priority 0;\n");
    for rule in &acl.egress {
        out.push_str(&format!("    # {}\n", rule.description));
        out.push_str(&format!("    {}\n", render_nft_rule(rule)));
    }
    out.push_str("    drop\n  }\n}\n");
    out
}

fn render_nft_rule(rule: &AclRule) -> String {
    let verdict = match rule.action {
        RuleAction::Allow => "accept",
        RuleAction::Deny => "drop",
    };
    let mut clauses = Vec::new();
    if let Some(src) = &rule.source {
        clauses.push(format!("ip saddr {src}"));
    }
    if let Some(dst) = &rule.destination {
        clauses.push(format!("ip daddr {dst}"));
    }
    if let (Some(port), Some(proto)) = (rule.destination_port, rule.protocol) {
        let proto_str = match proto {
            devplane_types::models::Protocol::Tcp => "tcp",
            devplane_types::models::Protocol::Udp => "udp",
        };
        clauses.push(format!("{proto_str} dport {port}"));
    }
    format!("{} {verdict}", clauses.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> AclContext {
        AclContext { proxy_source_ip: "10.1.0.1".to_string(), app_port: Some(8080) }
    }

    #[test]
    fn http_only_has_exactly_two_allows_before_deny() {
        let acl = expand(AclPreset::HttpOnly, &ctx(), None);
        assert_eq!(acl.ingress.len(), 3);
        assert_eq!(acl.ingress[0].action, RuleAction::Allow);
        assert_eq!(acl.ingress[1].action, RuleAction::Allow);
        assert_eq!(acl.ingress[2].action, RuleAction::Deny);
        assert_eq!(acl.ingress[0].destination_port, Some(80));
        assert_eq!(acl.ingress[1].destination_port, Some(443));
    }

    #[test]
    fn full_isolation_denies_by_default() {
        let acl = expand(AclPreset::FullIsolation, &ctx(), None);
        let verdict = evaluate_ingress(&acl, "203.0.113.5", 22, devplane_types::models::Protocol::Tcp);
        assert_eq!(verdict, RuleAction::Deny);
    }

    #[test]
    fn full_isolation_allows_proxy_to_app_port() {
        let acl = expand(AclPreset::FullIsolation, &ctx(), None);
        let verdict = evaluate_ingress(&acl, "10.1.0.1", 8080, devplane_types::models::Protocol::Tcp);
        assert_eq!(verdict, RuleAction::Allow);
    }

    #[test]
    fn permissive_allows_everything() {
        let acl = expand(AclPreset::Permissive, &ctx(), None);
        let verdict = evaluate_ingress(&acl, "1.2.3.4", 9999, devplane_types::models::Protocol::Udp);
        assert_eq!(verdict, RuleAction::Allow);
    }

    #[test]
    fn custom_preset_stores_overrides_verbatim() {
        let custom_ingress = vec![allow_port(2222, devplane_types::models::Protocol::Tcp, "custom ssh")];
        let acl = expand(AclPreset::Custom, &ctx(), Some((custom_ingress.clone(), vec![])));
        assert_eq!(acl.ingress, custom_ingress);
    }

    #[test]
    fn first_match_wins() {
        let acl = NetworkAcl {
            preset: AclPreset::Custom,
            ingress: vec![
                AclRule { action: RuleAction::Deny, source: None, destination: None, destination_port: Some(80), protocol: Some(devplane_types::models::Protocol::Tcp), description: "deny 80".into() },
                allow_port(80, devplane_types::models::Protocol::Tcp, "allow 80 (shadowed)"),
            ],
            egress: vec![],
        };
        let verdict = evaluate_ingress(&acl, "1.2.3.4", 80, devplane_types::models::Protocol::Tcp);
        assert_eq!(verdict, RuleAction::Deny);
    }
}
