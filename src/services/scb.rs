use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde_json::{Value, json};
use sha2::Sha256;
use thiserror::Error;
use uuid::Uuid;

use crate::config::ScbConfig;
use crate::services::promptpay;

/// Gateway constraint on reference fields.
pub const REF_MAX_LEN: usize = 20;

const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway auth failed: {status} {body}")]
    Auth { status: u16, body: String },

    #[error("gateway request failed: {status} {body}")]
    Request { status: u16, body: String },

    #[error("gateway network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("gateway response missing {0}")]
    MalformedResponse(&'static str),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("invalid reference: {0}")]
    InvalidReference(String),
}

impl GatewayError {
    /// Classifies the sandbox's maintenance window (upstream code 9990).
    /// Heuristic text match until the gateway publishes an error taxonomy.
    pub fn is_maintenance(&self) -> bool {
        let body = match self {
            GatewayError::Auth { body, .. } | GatewayError::Request { body, .. } => body,
            _ => return false,
        };
        let lower = body.to_lowercase();
        lower.contains("9990")
            || lower.contains("service not available")
            || lower.contains("maintenance")
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiVersion {
    /// Legacy endpoint, returns an embeddable raw payload string.
    V1,
    /// Current endpoint, returns a hosted QR image URL.
    V2,
}

/// Normalized result of a QR creation call, regardless of whether the
/// gateway nested the fields under a `data` envelope.
#[derive(Debug, Clone)]
pub struct QrCreation {
    pub version: ApiVersion,
    pub qr_image_url: Option<String>,
    pub qr_raw_data: Option<String>,
    pub transaction_id: Option<String>,
    pub qr_id: Option<String>,
    pub raw: Value,
}

/// Normalized result of a status inquiry.
#[derive(Debug, Clone)]
pub struct TransactionStatus {
    pub status: String,
    pub raw: Value,
}

impl TransactionStatus {
    pub fn is_success(&self) -> bool {
        self.status == "PAID" || self.status == "SUCCESS"
    }
}

#[derive(Clone)]
pub struct ScbClient {
    http: Client,
    config: ScbConfig,
}

impl ScbClient {
    pub fn new(config: ScbConfig) -> anyhow::Result<Self> {
        let http = Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self { http, config })
    }

    /// Exchange the application credentials for a short-lived bearer token.
    /// Tokens are fetched fresh per transaction; the gateway gives no long
    /// lifetime guarantee worth tracking.
    pub async fn get_access_token(&self) -> GatewayResult<String> {
        let body = json!({
            "applicationKey": self.config.client_id,
            "applicationSecret": self.config.client_secret,
        });
        let raw = self
            .post("/v1/oauth/token", None, &body)
            .await
            .map_err(|err| match err {
                GatewayError::Request { status, body } => GatewayError::Auth { status, body },
                other => other,
            })?;

        field_str(&raw, "accessToken")
            .map(str::to_owned)
            .ok_or(GatewayError::MalformedResponse("accessToken"))
    }

    /// Request a QR30 against the configured biller. `order_ref` and
    /// `user_ref` are mandatory under the two-reference merchant profile;
    /// `channel` is appended to the configured ref3 prefix.
    pub async fn create_qr(
        &self,
        access_token: &str,
        amount: Decimal,
        order_ref: &str,
        user_ref: &str,
        channel: &str,
        version: ApiVersion,
    ) -> GatewayResult<QrCreation> {
        let ref1 = sanitize_reference(order_ref);
        if ref1.is_empty() {
            return Err(GatewayError::InvalidReference("ref1 is required".into()));
        }
        let ref2 = sanitize_reference(user_ref);
        if ref2.is_empty() {
            return Err(GatewayError::InvalidReference(
                "ref2 is required under the two-reference merchant profile".into(),
            ));
        }
        let ref3 = sanitize_reference(&format!("{}{channel}", self.config.ref3_prefix));
        let amount_text = format_amount(amount)?;

        let (path, body) = match version {
            ApiVersion::V1 => {
                // v1 takes the amount as a string and accepts a callback URL.
                let mut body = json!({
                    "qrType": "PP",
                    "amount": amount_text,
                    "ppType": "BILLERID",
                    "ppId": self.config.biller_id,
                    "ref1": ref1,
                    "ref2": ref2,
                    "ref3": ref3,
                });
                if let Some(url) = &self.config.callback_url {
                    body["merchantMetaData"] = json!({ "callbackUrl": url });
                }
                ("/v1/payment/qrcode/create", body)
            }
            ApiVersion::V2 => {
                // v2 takes the amount as Number(13,2).
                let amount_num = amount
                    .round_dp(2)
                    .to_f64()
                    .ok_or_else(|| GatewayError::InvalidAmount(amount.to_string()))?;
                let body = json!({
                    "qrType": "PP",
                    "amount": amount_num,
                    "ppType": "BILLERID",
                    "ppId": self.config.biller_id,
                    "ref1": ref1,
                    "ref2": ref2,
                    "ref3": ref3,
                });
                ("/v2/payment/qrcode/create", body)
            }
        };

        let raw = self.post(path, Some(access_token), &body).await?;
        Ok(parse_qr_response(version, raw))
    }

    /// v2 first; on a maintenance-classified failure retry once with v1.
    /// This is the only automatic retry in the payment subsystem.
    pub async fn create_qr_with_fallback(
        &self,
        access_token: &str,
        amount: Decimal,
        order_ref: &str,
        user_ref: &str,
        channel: &str,
    ) -> GatewayResult<QrCreation> {
        match self
            .create_qr(access_token, amount, order_ref, user_ref, channel, ApiVersion::V2)
            .await
        {
            Ok(created) => Ok(created),
            Err(err) if err.is_maintenance() => {
                tracing::warn!(error = %err, "QR v2 unavailable, falling back to v1");
                self.create_qr(access_token, amount, order_ref, user_ref, channel, ApiVersion::V1)
                    .await
            }
            Err(err) => Err(err),
        }
    }

    /// Bill payment inquiry by the transaction id returned at QR creation.
    pub async fn inquiry_by_transaction(
        &self,
        access_token: &str,
        transaction_id: &str,
    ) -> GatewayResult<TransactionStatus> {
        let body = json!({ "transactionId": transaction_id });
        let raw = self
            .post("/v2/payment/billpayment/inquiry", Some(access_token), &body)
            .await?;
        Ok(normalize_status(raw))
    }

    /// Fallback inquiry by reference pair, for orders whose webhook has not
    /// arrived and whose transaction id was never persisted.
    pub async fn inquiry_by_reference(
        &self,
        access_token: &str,
        order_ref: &str,
        user_ref: &str,
    ) -> GatewayResult<TransactionStatus> {
        let body = json!({
            "reference1": sanitize_reference(order_ref),
            "reference2": sanitize_reference(user_ref),
        });
        let raw = self
            .post("/v3/payment/billpayment/inquiry", Some(access_token), &body)
            .await?;
        Ok(normalize_status(raw))
    }

    /// Recompute the HMAC-SHA256 of the exact raw body and compare against
    /// the `x-signature` header, accepting base64 or hex encodings. Never
    /// errors; anything malformed is simply not a valid signature.
    pub fn verify_signature(&self, raw_body: &[u8], signature: Option<&str>) -> bool {
        verify_hmac_sha256(raw_body, &self.config.webhook_secret, signature)
    }

    async fn post(&self, path: &str, token: Option<&str>, body: &Value) -> GatewayResult<Value> {
        let url = format!("{}{path}", self.config.base_url);
        let mut request = self
            .http
            .post(&url)
            .header("Content-Type", "application/json")
            .header("resourceOwnerId", &self.config.api_key)
            .header("requestUId", request_uid())
            .header("accept-language", "EN")
            .json(body);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(GatewayError::Request {
                status: status.as_u16(),
                body: text,
            });
        }

        // Some sandbox responses are not JSON at all; keep them as a string.
        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }
}

/// 32 alphanumeric characters, no dashes, as the gateway requires.
fn request_uid() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Renders a payment amount with exactly two fractional digits. Negative
/// amounts are rejected before any network call.
pub fn format_amount(value: Decimal) -> GatewayResult<String> {
    if value.is_sign_negative() {
        return Err(GatewayError::InvalidAmount(value.to_string()));
    }
    Ok(format!("{:.2}", value.round_dp(2)))
}

/// Uppercase, strip anything outside `[A-Z0-9]`, cap at the gateway's
/// 20-character reference limit.
pub fn sanitize_reference(value: &str) -> String {
    value
        .trim()
        .chars()
        .filter_map(|c| {
            let c = c.to_ascii_uppercase();
            c.is_ascii_alphanumeric().then_some(c)
        })
        .take(REF_MAX_LEN)
        .collect()
}

/// Deterministic primary reference for an order: `ORD` + the id zero-padded
/// to 10 digits, truncated to the reference limit.
pub fn make_order_ref(order_id: i64) -> String {
    sanitize_reference(&format!("ORD{order_id:010}"))
}

/// Inverse of [`make_order_ref`], tolerant of a bare numeric reference.
pub fn parse_order_ref(reference: &str) -> Option<i64> {
    let digits: String = reference
        .trim()
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .collect();
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

fn envelope(raw: &Value) -> &Value {
    raw.get("data").unwrap_or(raw)
}

fn field_str<'a>(raw: &'a Value, key: &str) -> Option<&'a str> {
    envelope(raw)
        .get(key)
        .or_else(|| raw.get(key))
        .and_then(Value::as_str)
}

fn parse_qr_response(version: ApiVersion, raw: Value) -> QrCreation {
    let qr_image_url = field_str(&raw, "qrImageUrl").map(str::to_owned);
    let qr_raw_data = field_str(&raw, "qrRawData").map(str::to_owned);
    let transaction_id = field_str(&raw, "transactionId").map(str::to_owned);
    let qr_id = field_str(&raw, "qrId").map(str::to_owned);

    if let Some(payload) = &qr_raw_data {
        if !promptpay::has_valid_checksum(payload) {
            tracing::warn!("v1 QR payload carries an invalid CRC16 suffix");
        }
    }

    QrCreation {
        version,
        qr_image_url,
        qr_raw_data,
        transaction_id,
        qr_id,
        raw,
    }
}

fn normalize_status(raw: Value) -> TransactionStatus {
    let status = field_str(&raw, "status")
        .or_else(|| field_str(&raw, "transactionStatus"))
        .unwrap_or_default()
        .to_uppercase();
    TransactionStatus { status, raw }
}

fn verify_hmac_sha256(raw_body: &[u8], secret: &str, signature: Option<&str>) -> bool {
    let Some(signature) = signature else {
        return false;
    };
    let signature = signature.trim();
    if signature.is_empty() {
        return false;
    }

    let mut mac = match Hmac::<Sha256>::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(raw_body);
    let expected = mac.finalize().into_bytes();

    let mut candidates: Vec<Vec<u8>> = Vec::new();
    if let Ok(bytes) = BASE64.decode(signature) {
        candidates.push(bytes);
    }
    if let Ok(bytes) = hex::decode(signature.to_lowercase()) {
        candidates.push(bytes);
    }

    candidates
        .iter()
        .any(|given| given.len() == expected.len() && secure_eq(given, &expected))
}

fn secure_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0_u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_refs_are_deterministic_and_bounded() {
        assert_eq!(make_order_ref(1), "ORD0000000001");
        assert_eq!(make_order_ref(1), make_order_ref(1));
        assert_eq!(make_order_ref(1234567890), "ORD1234567890");

        for id in 0..500_i64 {
            let reference = make_order_ref(id);
            assert!(reference.len() <= REF_MAX_LEN);
            assert!(reference.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
        }
    }

    #[test]
    fn small_order_ids_never_collide() {
        let mut seen = std::collections::HashSet::new();
        for id in 0..10_000_i64 {
            assert!(seen.insert(make_order_ref(id)), "collision at id {id}");
        }
    }

    #[test]
    fn order_refs_round_trip() {
        assert_eq!(parse_order_ref("ORD0000000042"), Some(42));
        assert_eq!(parse_order_ref("42"), Some(42));
        assert_eq!(parse_order_ref(" ORD0000000007 "), Some(7));
        assert_eq!(parse_order_ref("ORD"), None);
        assert_eq!(parse_order_ref(""), None);
    }

    #[test]
    fn references_are_sanitized() {
        assert_eq!(sanitize_reference(" web-01 "), "WEB01");
        assert_eq!(sanitize_reference("abc"), "ABC");
        assert_eq!(sanitize_reference("ก-ข-ค"), "");
        assert_eq!(
            sanitize_reference("ABCDEFGHIJKLMNOPQRSTUVWXYZ").len(),
            REF_MAX_LEN
        );
    }

    #[test]
    fn amounts_render_with_two_fraction_digits() {
        let amount: Decimal = "250".parse().unwrap();
        assert_eq!(format_amount(amount).unwrap(), "250.00");
        let amount: Decimal = "99.999".parse().unwrap();
        assert_eq!(format_amount(amount).unwrap(), "100.00");
        let amount: Decimal = "-1".parse().unwrap();
        assert!(matches!(
            format_amount(amount),
            Err(GatewayError::InvalidAmount(_))
        ));
    }

    #[test]
    fn maintenance_errors_are_classified() {
        let maintenance = GatewayError::Request {
            status: 503,
            body: r#"{"status":{"code":9990,"description":"Service not available"}}"#.into(),
        };
        assert!(maintenance.is_maintenance());

        let other = GatewayError::Request {
            status: 400,
            body: r#"{"status":{"code":1101,"description":"Invalid request"}}"#.into(),
        };
        assert!(!other.is_maintenance());
        assert!(!GatewayError::MalformedResponse("accessToken").is_maintenance());
    }

    #[test]
    fn qr_response_fields_are_lifted_from_either_shape() {
        let enveloped = serde_json::json!({
            "data": { "qrImageUrl": "https://qr/img.png", "transactionId": "tx-1", "qrId": "qr-1" }
        });
        let parsed = parse_qr_response(ApiVersion::V2, enveloped);
        assert_eq!(parsed.qr_image_url.as_deref(), Some("https://qr/img.png"));
        assert_eq!(parsed.transaction_id.as_deref(), Some("tx-1"));

        let flat = serde_json::json!({ "qrRawData": "PAYLOAD", "transactionId": "tx-2" });
        let parsed = parse_qr_response(ApiVersion::V1, flat);
        assert_eq!(parsed.qr_raw_data.as_deref(), Some("PAYLOAD"));
        assert_eq!(parsed.transaction_id.as_deref(), Some("tx-2"));
        assert!(parsed.qr_image_url.is_none());
    }

    #[test]
    fn inquiry_status_is_normalized_uppercase() {
        let raw = serde_json::json!({ "data": { "transactionStatus": "paid" } });
        let status = normalize_status(raw);
        assert_eq!(status.status, "PAID");
        assert!(status.is_success());

        let raw = serde_json::json!({ "status": "pending" });
        assert!(!normalize_status(raw).is_success());
    }

    #[test]
    fn signature_accepts_base64_and_hex() {
        use base64::Engine as _;
        use hmac::Mac;

        let secret = "shhh";
        let body = br#"{"data":{"ref1":"ORD0000000001","status":"PAID"}}"#;
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        let digest = mac.finalize().into_bytes();

        let b64 = base64::engine::general_purpose::STANDARD.encode(&digest);
        let hexed = hex::encode(&digest);

        assert!(verify_hmac_sha256(body, secret, Some(&b64)));
        assert!(verify_hmac_sha256(body, secret, Some(&hexed)));
        assert!(verify_hmac_sha256(body, secret, Some(&hexed.to_uppercase())));
    }

    #[test]
    fn signature_rejects_mutations_and_garbage() {
        use base64::Engine as _;
        use hmac::Mac;

        let secret = "shhh";
        let body = b"payload-bytes";
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        let b64 = base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes());

        assert!(verify_hmac_sha256(body, secret, Some(&b64)));
        assert!(!verify_hmac_sha256(b"payload-byteZ", secret, Some(&b64)));
        assert!(!verify_hmac_sha256(body, "other-secret", Some(&b64)));
        assert!(!verify_hmac_sha256(body, secret, Some("not-a-signature")));
        assert!(!verify_hmac_sha256(body, secret, Some("")));
        assert!(!verify_hmac_sha256(body, secret, None));
    }

    #[test]
    fn request_uids_are_32_alphanumeric_chars() {
        let uid = request_uid();
        assert_eq!(uid.len(), 32);
        assert!(uid.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
