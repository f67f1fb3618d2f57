use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::retry::RetryPolicy;
use super::status::{InternalStatus, SignerStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompanyId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignerId(pub u64);

macro_rules! display_id {
    ($($ty:ty),*) => {
        $(impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        })*
    };
}

display_id!(CompanyId, DocumentId, SignerId);

/// A tenant's binding to one signing provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderBinding {
    pub provider_code: String,
    #[serde(skip_serializing, default)]
    pub api_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default)]
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Company {
    pub id: CompanyId,
    pub name: String,
    #[serde(flatten)]
    pub binding: ProviderBinding,
    pub created_at: DateTime<Utc>,
}

/// Payload used to register a tenant.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CompanyRequest {
    pub name: String,
    pub provider_code: String,
    pub api_token: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
}

impl CompanyRequest {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("company name is required".to_string());
        }
        if self.api_token.trim().is_empty() {
            return Err("api_token is required".to_string());
        }
        if let Some(url) = &self.base_url {
            if !is_http_url(url) {
                return Err("base_url must be an http(s) URL".to_string());
            }
        }
        Ok(())
    }

    pub fn into_binding(self) -> (String, ProviderBinding) {
        let binding = ProviderBinding {
            provider_code: self.provider_code.trim().to_ascii_lowercase(),
            api_token: self.api_token,
            base_url: self
                .base_url
                .map(|url| url.trim().trim_end_matches('/').to_string()),
            retry: self.retry.unwrap_or_default(),
        };
        (self.name.trim().to_string(), binding)
    }
}

/// Signer fields supplied by callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerInput {
    pub name: String,
    pub email: String,
}

impl SignerInput {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("signer name is required".to_string());
        }
        if !self.email.contains('@') || self.email.trim().len() < 3 {
            return Err(format!("signer email '{}' is not valid", self.email));
        }
        Ok(())
    }
}

/// ZapSign-specific extras forwarded on document creation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZapSignOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disable_signer_emails: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signed_file_only_finished: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand_primary_color: Option<String>,
}

impl ZapSignOptions {
    fn validate(&self) -> Result<(), String> {
        if let Some(lang) = &self.lang {
            if lang.trim().is_empty() {
                return Err("lang must not be empty".to_string());
            }
        }
        if let Some(color) = &self.brand_primary_color {
            let hex = color.strip_prefix('#').unwrap_or("");
            if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(format!("brand_primary_color '{color}' must look like #RRGGBB"));
            }
        }
        Ok(())
    }
}

/// Typed creation options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_limit_to_sign: Option<DateTime<Utc>>,
    #[serde(default)]
    pub zapsign: ZapSignOptions,
}

impl CreateOptions {
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), String> {
        if let Some(limit) = self.date_limit_to_sign {
            if limit <= now {
                return Err(format!(
                    "date_limit_to_sign {} is not in the future",
                    limit.to_rfc3339()
                ));
            }
        }
        self.zapsign.validate()
    }
}

/// Caller request to create a document, optionally as a local draft.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRequest {
    pub name: String,
    #[serde(alias = "url_pdf")]
    pub file_url: String,
    pub signers: Vec<SignerInput>,
    #[serde(flatten)]
    pub options: CreateOptions,
    #[serde(default)]
    pub as_draft: bool,
}

impl DocumentRequest {
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), String> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err("document name is required".to_string());
        }
        if name.chars().count() > 255 {
            return Err("document name must be at most 255 characters".to_string());
        }
        if !is_http_url(&self.file_url) {
            return Err("file_url must be an http(s) URL".to_string());
        }
        if self.signers.is_empty() {
            return Err("at least one signer is required".to_string());
        }
        for signer in &self.signers {
            signer.validate()?;
        }
        self.options.validate(now)
    }
}

fn is_http_url(raw: &str) -> bool {
    let raw = raw.trim();
    ["http://", "https://"].iter().any(|scheme| {
        raw.len() > scheme.len()
            && raw
                .get(..scheme.len())
                .is_some_and(|prefix| prefix.eq_ignore_ascii_case(scheme))
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signer {
    pub id: SignerId,
    pub name: String,
    pub email: String,
    pub token: Option<String>,
    pub sign_url: Option<String>,
    pub status: SignerStatus,
}

impl Signer {
    pub fn input(&self) -> SignerInput {
        SignerInput {
            name: self.name.clone(),
            email: self.email.clone(),
        }
    }

    /// Moves the signer forward; returns whether anything changed.
    pub fn advance_to(&mut self, observed: SignerStatus) -> bool {
        match self.status.advance(observed) {
            Some(next) => {
                self.status = next;
                true
            }
            None => false,
        }
    }
}

/// A signable document and the signers it exclusively owns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub company_id: CompanyId,
    pub name: String,
    pub file_url: String,
    pub open_id: Option<String>,
    pub token: Option<String>,
    pub provider_status: Option<String>,
    pub internal_status: InternalStatus,
    #[serde(flatten)]
    pub options: CreateOptions,
    pub signers: Vec<Signer>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// The provider token, when the document exists provider-side.
    pub fn provider_token(&self) -> Option<&str> {
        self.token.as_deref().filter(|token| !token.trim().is_empty())
    }

    pub fn date_limit_to_sign(&self) -> Option<DateTime<Utc>> {
        self.options.date_limit_to_sign
    }

    pub fn signer_statuses(&self) -> Vec<SignerStatus> {
        self.signers.iter().map(|signer| signer.status).collect()
    }

    pub fn signer_by_token_mut(&mut self, token: &str) -> Option<&mut Signer> {
        self.signers
            .iter_mut()
            .find(|signer| signer.token.as_deref() == Some(token))
    }

    pub fn signer_by_email_mut(&mut self, email: &str) -> Option<&mut Signer> {
        let email = email.trim();
        self.signers
            .iter_mut()
            .find(|signer| signer.email.trim().eq_ignore_ascii_case(email))
    }

    /// Bulk forward update of every signer matching `predicate`; returns how many moved.
    pub fn advance_signers_where<P>(&mut self, predicate: P, observed: SignerStatus) -> usize
    where
        P: Fn(&Signer) -> bool,
    {
        self.signers
            .iter_mut()
            .filter(|signer| predicate(signer))
            .map(|signer| signer.advance_to(observed))
            .filter(|moved| *moved)
            .count()
    }
}

/// Insert payload for a document; the store assigns identities and timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct NewDocument {
    pub company_id: CompanyId,
    pub name: String,
    pub file_url: String,
    pub open_id: Option<String>,
    pub token: Option<String>,
    pub provider_status: Option<String>,
    pub internal_status: InternalStatus,
    pub options: CreateOptions,
    pub signers: Vec<NewSigner>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSigner {
    pub name: String,
    pub email: String,
    pub token: Option<String>,
    pub sign_url: Option<String>,
    pub status: SignerStatus,
}

impl NewSigner {
    pub fn pending(input: &SignerInput) -> Self {
        Self {
            name: input.name.trim().to_string(),
            email: input.email.trim().to_string(),
            token: None,
            sign_url: None,
            status: SignerStatus::Pending,
        }
    }
}
