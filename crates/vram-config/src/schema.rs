use schemars::schema::{RootSchema, Schema};
use schemars::schema_for;
use serde_json::json;

use crate::VramConfig;

/// JSON schema for `vram.toml`, for editor tooling and CI validation.
#[must_use]
pub fn json_schema() -> RootSchema {
    let mut schema = schema_for!(VramConfig);
    suggest_mode_names(&mut schema);
    schema
}

fn suggest_mode_names(schema: &mut RootSchema) {
    // Mode names are matched case-insensitively and unknown names degrade to manual sizing,
    // so the schema only suggests values instead of enumerating them.
    let Some(Schema::Object(definition)) = schema.definitions.get_mut("ReservationConfig") else {
        return;
    };
    let Some(Schema::Object(mode)) = definition.object().properties.get_mut("mode") else {
        return;
    };
    mode.metadata().examples = vec![json!("smart"), json!("auto"), json!("manual")];
}
