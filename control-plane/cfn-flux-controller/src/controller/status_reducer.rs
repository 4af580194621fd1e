use serde_json::{Value as JsonValue, json};
use tracing::{debug, trace};

use crate::crd::{CloudFormationStackStatus, Condition, READY_CONDITION};

/// Merge a freshly computed status onto the latest persisted one.
///
/// Conditions owned by other writers are preserved; the controller's own
/// conditions are upserted by type.
pub fn merge_status(
    latest: Option<&CloudFormationStackStatus>,
    mut desired: CloudFormationStackStatus,
) -> CloudFormationStackStatus {
    if let Some(cur) = latest {
        let incoming = std::mem::take(&mut desired.conditions);
        desired.conditions = upsert_conditions(&cur.conditions, incoming);
        if desired.last_applied_revision.is_none() {
            desired.last_applied_revision = cur.last_applied_revision.clone();
        }
        if desired.last_applied_change_set.is_none() {
            desired.last_applied_change_set =
                cur.last_applied_change_set.clone();
        }
        // observedGeneration never moves backwards
        if cur.observed_generation > desired.observed_generation {
            desired.observed_generation = cur.observed_generation;
        }
    }
    desired
}

/// Upsert conditions by type. A condition whose status did not change keeps
/// its previous `lastTransitionTime`.
pub fn upsert_conditions(
    existing: &[Condition],
    incoming: Vec<Condition>,
) -> Vec<Condition> {
    let mut out: Vec<Condition> = existing.to_vec();
    for mut inc in incoming {
        if let Some(idx) = out.iter().position(|c| c.type_ == inc.type_) {
            if out[idx].status == inc.status {
                inc.last_transition_time =
                    out[idx].last_transition_time.clone();
            }
            out[idx] = inc;
        } else {
            out.push(inc);
        }
    }
    out.sort_by_key(|c| cond_rank(&c.type_));
    out
}

fn cond_rank(t: &str) -> u8 {
    match t {
        READY_CONDITION => 0,
        _ => 250,
    }
}

pub fn should_patch_status(
    current: Option<&CloudFormationStackStatus>,
    desired: &CloudFormationStackStatus,
) -> bool {
    match current {
        None => {
            debug!("should_patch_status: no current status, patching");
            true
        }
        Some(cur) => {
            let cur_norm = normalize_status(cur);
            let des_norm = normalize_status(desired);
            let differs = cur_norm != des_norm;
            if differs {
                debug!(
                    "should_patch_status: status differs, patching\ncurrent={}\ndesired={}",
                    serde_json::to_string(&cur_norm).unwrap_or_default(),
                    serde_json::to_string(&des_norm).unwrap_or_default()
                );
            } else {
                trace!(
                    "should_patch_status: status identical, skipping patch"
                );
            }
            differs
        }
    }
}

fn normalize_status(s: &CloudFormationStackStatus) -> JsonValue {
    let mut v = serde_json::to_value(s).unwrap_or_else(|_| json!({}));
    if let JsonValue::Object(ref mut map) = v {
        if let Some(JsonValue::Array(conds)) = map.get_mut("conditions") {
            for c in conds.iter_mut() {
                if let Some(obj) = c.as_object_mut() {
                    obj.remove("lastTransitionTime");
                }
            }
        }
    }
    v
}
