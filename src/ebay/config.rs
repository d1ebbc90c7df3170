use once_cell::sync::Lazy;
use std::env;

pub static APP_ID: Lazy<String> = Lazy::new(|| env::var("EBAY_APP_ID").unwrap_or_default());

pub static APP_SECRET: Lazy<String> = Lazy::new(|| env::var("EBAY_CERT_ID").unwrap_or_default());

pub static ROOT: Lazy<String> =
    Lazy::new(|| env::var("EBAY_API_ROOT").unwrap_or_else(|_| "https://api.ebay.com".to_string()));

pub static OAUTH_TOKEN_URL: Lazy<String> =
    Lazy::new(|| format!("{}/identity/v1/oauth2/token", *ROOT));

pub static MARKETPLACE_ID: Lazy<String> =
    Lazy::new(|| env::var("EBAY_MARKETPLACE_ID").unwrap_or_else(|_| "EBAY_FR".to_string()));

pub static ENDUSER_CTX: Lazy<String> = Lazy::new(|| {
    env::var("EBAY_ENDUSERCTX").unwrap_or_else(|_| "contextualLocation=country=FR".to_string())
});

pub const OAUTH_SCOPE: &str = "https://api.ebay.com/oauth/api_scope";
