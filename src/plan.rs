//! Schema-driven planning.
//!
//! Compares prior state with the proposed state attribute by attribute.
//! Computed attributes keep their prior value; a change to a force-new
//! attribute marks the plan as a replacement, which clears them.

use serde_json::{Map, Value};

use crate::schema::Schema;
use crate::types::{AttributeChange, PlanResult};

/// Plan a resource change.
///
/// `prior` is `None` for a create. A null `proposed` plans a destroy.
pub fn plan_resource(schema: &Schema, prior: Option<&Value>, proposed: Value) -> PlanResult {
    let empty = Map::new();
    let prior_obj = prior.and_then(Value::as_object).unwrap_or(&empty);

    if proposed.is_null() {
        let changes = prior_obj
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| AttributeChange::removed(k.clone(), v.clone()))
            .collect();
        return PlanResult::with_changes(Value::Null, changes, false);
    }

    let mut planned = match proposed {
        Value::Object(map) => map,
        _ => Map::new(),
    };

    let mut changes = Vec::new();
    let mut requires_replace = false;

    for (name, attr) in &schema.attributes {
        let computed_only = attr.flags.computed && !attr.flags.optional && !attr.flags.required;
        if computed_only {
            let carried = prior_obj.get(name).cloned().unwrap_or(Value::Null);
            planned.insert(name.clone(), carried);
            continue;
        }

        let before = prior_obj.get(name).cloned().unwrap_or(Value::Null);
        let after = planned.get(name).cloned().unwrap_or(Value::Null);
        if before == after {
            continue;
        }

        if prior.is_some() && attr.force_new {
            requires_replace = true;
        }
        changes.push(match (before.is_null(), after.is_null()) {
            (true, _) => AttributeChange::added(name.clone(), after),
            (false, true) => AttributeChange::removed(name.clone(), before),
            (false, false) => AttributeChange::modified(name.clone(), before, after),
        });
    }

    // A replacement is a fresh create; computed values are not inherited.
    if requires_replace {
        for (name, attr) in &schema.attributes {
            if attr.flags.computed && !attr.flags.optional && !attr.flags.required {
                planned.insert(name.clone(), Value::Null);
            }
        }
    }

    PlanResult::with_changes(Value::Object(planned), changes, requires_replace)
}
