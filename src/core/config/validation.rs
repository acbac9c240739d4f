use serde_json::{Map, Value};

use crate::core::errors::ApiError;

/// Type and range checks for the merged config. Unknown keys are ignored.
pub fn validate_config(config: &Value) -> Result<(), ApiError> {
    let root = config
        .as_object()
        .ok_or_else(|| config_type_error("root", "object"))?;

    if let Some(retrieval) = expect_optional_object(root, "retrieval")? {
        validate_u64_field(retrieval, "retrieval.top_k", "top_k", 1, 100)?;
        validate_f64_field(
            retrieval,
            "retrieval.vector_weight",
            "vector_weight",
            0.0,
            f64::MAX,
        )?;
        validate_f64_field(
            retrieval,
            "retrieval.lexical_weight",
            "lexical_weight",
            0.0,
            f64::MAX,
        )?;
        validate_f64_field(retrieval, "retrieval.rrf_c", "rrf_c", 0.0, 10_000.0)?;
        validate_bool_field(retrieval, "retrieval.fan_out", "fan_out")?;
    }

    for provider in ["llm", "embedding"] {
        if let Some(section) = expect_optional_object(root, provider)? {
            validate_optional_string_field(section, &format!("{provider}.base_url"), "base_url")?;
            validate_optional_string_field(section, &format!("{provider}.model"), "model")?;
            validate_optional_string_field(section, &format!("{provider}.api_key"), "api_key")?;
            validate_u64_field(
                section,
                &format!("{provider}.timeout_secs"),
                "timeout_secs",
                1,
                86_400,
            )?;
        }
    }

    if let Some(generation) = expect_optional_object(root, "generation")? {
        validate_optional_string_field(
            generation,
            "generation.response_language",
            "response_language",
        )?;
        validate_bool_field(
            generation,
            "generation.contextualize_fallback",
            "contextualize_fallback",
        )?;
        validate_f64_field(generation, "generation.temperature", "temperature", 0.0, 2.0)?;
        validate_u64_field(generation, "generation.max_tokens", "max_tokens", 1, 1_000_000)?;
    }

    if let Some(server) = expect_optional_object(root, "server")? {
        validate_optional_string_field(server, "server.host", "host")?;
        validate_u64_field(server, "server.port", "port", 1, 65_535)?;
        validate_string_array_field(
            server,
            "server.cors_allowed_origins",
            "cors_allowed_origins",
        )?;
        validate_optional_string_field(
            server,
            "server.default_conversation_id",
            "default_conversation_id",
        )?;
        validate_string_array_field(
            server,
            "server.default_collection_ids",
            "default_collection_ids",
        )?;
    }

    Ok(())
}

fn expect_optional_object<'a>(
    root: &'a Map<String, Value>,
    key: &str,
) -> Result<Option<&'a Map<String, Value>>, ApiError> {
    match root.get(key) {
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(_) => Err(config_type_error(key, "object")),
        None => Ok(None),
    }
}

fn validate_bool_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    if value.as_bool().is_some() {
        return Ok(());
    }
    Err(config_type_error(path, "boolean"))
}

fn validate_u64_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
    min: u64,
    max: u64,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(number) = value.as_u64() else {
        return Err(config_type_error(path, "integer"));
    };
    if number < min || number > max {
        return Err(ApiError::BadRequest(format!(
            "Invalid config at '{}': must be between {} and {}",
            path, min, max
        )));
    }
    Ok(())
}

fn validate_f64_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
    min: f64,
    max: f64,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(number) = value.as_f64() else {
        return Err(config_type_error(path, "number"));
    };
    if !number.is_finite() || number < min || number > max {
        return Err(ApiError::BadRequest(format!(
            "Invalid config at '{}': must be between {} and {}",
            path, min, max
        )));
    }
    Ok(())
}

fn validate_optional_string_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    if value.as_str().is_none() {
        return Err(config_type_error(path, "string"));
    }
    Ok(())
}

fn validate_string_array_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), ApiError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(items) = value.as_array() else {
        return Err(config_type_error(path, "array of strings"));
    };
    for (index, item) in items.iter().enumerate() {
        let Some(text) = item.as_str() else {
            return Err(config_type_error(&format!("{}[{}]", path, index), "string"));
        };
        if text.trim().is_empty() {
            return Err(ApiError::BadRequest(format!(
                "Invalid config at '{}[{}]': value cannot be empty",
                path, index
            )));
        }
    }
    Ok(())
}

fn config_type_error(path: &str, expected: &str) -> ApiError {
    ApiError::BadRequest(format!(
        "Invalid config at '{}': expected {}",
        path, expected
    ))
}
