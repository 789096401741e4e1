use crate::admission::admission;
use crate::error::ApiError;
use crate::model::vectorize;
use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    middleware,
    response::Redirect,
    routing::{get, post},
    Json, Router,
};
use once_cell::sync::Lazy;
use serde_json::{json, Value};
use std::sync::{atomic::Ordering, Arc};
use tracing::error;

/// Builds the service router. Admission control wraps every route and the
/// fallback, so nothing is reachable without a token.
pub fn router(app: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/apidocs/", get(apidocs))
        .route("/predict", post(predict))
        .route("/status", get(status))
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(app.clone(), admission))
        .with_state(app)
}

// ----------------------
// Handlers
// ----------------------
pub async fn index() -> Redirect {
    Redirect::temporary("/apidocs/")
}

pub async fn apidocs() -> Json<Value> {
    Json((*OPENAPI).clone())
}

async fn not_found() -> (StatusCode, Json<Value>) {
    (StatusCode::NOT_FOUND, Json(json!({"detail": "Not Found"})))
}

pub async fn status(State(app): State<Arc<AppState>>) -> Json<Value> {
    let s = app.snapshot();
    Json(json!({
        "capacity": s.capacity,
        "refill_rate": s.refill_rate,
        "tokens": s.tokens,
        "total_requests": s.total_requests,
        "admitted": s.admitted,
        "rejected": s.rejected,
        "predictions": s.predictions,
        "prediction_errors": s.prediction_errors,
        "model": app.predictor().describe(),
    }))
}

pub async fn predict(State(app): State<Arc<AppState>>, body: Bytes) -> Result<Json<Value>, ApiError> {
    let body: Value = serde_json::from_slice(&body)
        .map_err(|_| ApiError::BadRequest("Invalid JSON body".to_string()))?;
    let query = body
        .get("query")
        .filter(|q| !is_falsy(q))
        .ok_or_else(|| ApiError::BadRequest("Query parameter is required".to_string()))?;

    let predictor = app.predictor();
    match vectorize(query).and_then(|features| predictor.predict(&features)) {
        Ok(age) => {
            app.predictions.fetch_add(1, Ordering::Relaxed);
            Ok(Json(json!({ "result": format_prediction(age) })))
        }
        Err(e) => {
            app.prediction_errors.fetch_add(1, Ordering::Relaxed);
            error!("prediction failed: {}", e);
            Err(e.into())
        }
    }
}

// -------- helpers --------

/// Renders a prediction the way clients of the service expect: whole values
/// keep a trailing ".0".
fn format_prediction(age: f32) -> String {
    if age.is_finite() && age.fract() == 0.0 {
        format!("{:.1}", age)
    } else {
        age.to_string()
    }
}

/// JSON values a client could send meaning "no query".
fn is_falsy(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

static OPENAPI: Lazy<Value> = Lazy::new(|| {
    let detail = json!({"type": "object", "properties": {"detail": {"type": "string"}}});
    let example = json!({
        "bmi": 29.423016908813725,
        "bone_density_(g/cm²)": 0.1328682798964727,
        "cognitive_function": 44.05917162252895,
        "gender=Male": 1,
        "systolic": 151,
        "diastolic": 109,
        "vision_sharpness": 0.2
    });
    let query = json!({
        "type": "object",
        "description": "Feature name to value. Strings are one-hot encoded as name=value.",
        "additionalProperties": {"oneOf": [{"type": "number"}, {"type": "string"}, {"type": "boolean"}]},
        "example": example
    });
    let body = json!({"type": "object", "required": ["query"], "properties": {"query": query}});
    let result = json!({"type": "object", "properties": {"result": {"type": "string"}}});
    let responses = json!({
        "200": {"description": "Predicted age", "content": {"application/json": {"schema": result}}},
        "400": {"description": "Missing query parameter", "content": {"application/json": {"schema": detail.clone()}}},
        "429": {"description": "Rate limit exceeded", "content": {"application/json": {"schema": detail.clone()}}},
        "500": {"description": "Prediction failed", "content": {"application/json": {"schema": detail}}}
    });
    let predict_op = json!({
        "summary": "Predict age based on clinical history",
        "requestBody": {"required": true, "content": {"application/json": {"schema": body}}},
        "responses": responses
    });
    json!({
        "openapi": "3.0.3",
        "info": {
            "title": "Age prediction API",
            "version": env!("CARGO_PKG_VERSION"),
            "description": "Predicts age from clinical history. All routes share one token-bucket rate limit."
        },
        "paths": {
            "/predict": {"post": predict_op},
            "/status": {"get": {"summary": "Rate limiter and request counters", "responses": {"200": {"description": "Counters"}}}}
        }
    })
});
