//! Forwarding rule diffing
//!
//! Rules are matched by frontend port only; cloud-assigned ids never take part
//! in matching. A rule missing its frontend or backend matches nothing.

use xelon_api::{BackendConfig, ForwardingRule};

/// Changes that turn the current rule set into the desired one.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReconcileDiff {
    /// Desired rules with no current counterpart.
    pub to_create: Vec<ForwardingRule>,
    /// Desired backend values, addressed by the current rule's ids.
    pub to_update: Vec<ForwardingRule>,
    /// Current rules no desired rule asks for.
    pub to_delete: Vec<ForwardingRule>,
}

impl ReconcileDiff {
    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
    }
}

pub fn reconcile(current: &[ForwardingRule], desired: &[ForwardingRule]) -> ReconcileDiff {
    let mut diff = ReconcileDiff::default();
    let mut claimed = vec![false; current.len()];

    // Unchanged rules claim their counterpart first, so a changed rule on a
    // shared frontend port never takes an identical rule's match.
    let mut changed = Vec::new();
    for want in desired {
        match unclaimed(current, &claimed, |have| {
            same_frontend(have, want) && same_backend(have, want)
        }) {
            Some(index) => claimed[index] = true,
            None => changed.push(want),
        }
    }

    for want in changed {
        match unclaimed(current, &claimed, |have| same_frontend(have, want)) {
            Some(index) => {
                claimed[index] = true;
                diff.to_update.push(backend_update(&current[index], want));
            }
            None => diff.to_create.push(want.clone()),
        }
    }

    diff.to_delete = current
        .iter()
        .zip(claimed)
        .filter(|(have, claimed)| {
            !claimed && !desired.iter().any(|want| same_frontend(have, want))
        })
        .map(|(rule, _)| rule.clone())
        .collect();

    diff
}

fn unclaimed(
    current: &[ForwardingRule],
    claimed: &[bool],
    matches: impl Fn(&ForwardingRule) -> bool,
) -> Option<usize> {
    current
        .iter()
        .zip(claimed)
        .position(|(have, claimed)| !claimed && matches(have))
}

/// Frontend port of a rule that has both sides.
fn match_port(rule: &ForwardingRule) -> Option<i32> {
    rule.backend.as_ref()?;
    rule.frontend_port()
}

fn same_frontend(a: &ForwardingRule, b: &ForwardingRule) -> bool {
    match (match_port(a), match_port(b)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

fn same_backend(a: &ForwardingRule, b: &ForwardingRule) -> bool {
    match (&a.backend, &b.backend) {
        (Some(a), Some(b)) => a.port == b.port && a.proxy_protocol == b.proxy_protocol,
        _ => false,
    }
}

/// Rule carrying `want`'s backend values and `have`'s ids.
fn backend_update(have: &ForwardingRule, want: &ForwardingRule) -> ForwardingRule {
    let id = have
        .backend
        .as_ref()
        .map(|b| b.id.clone())
        .unwrap_or_default();
    ForwardingRule {
        frontend: have.frontend.clone(),
        backend: want.backend.as_ref().map(|desired| BackendConfig {
            id,
            port: desired.port,
            proxy_protocol: desired.proxy_protocol,
        }),
    }
}
