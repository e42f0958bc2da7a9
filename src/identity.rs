//! Device identity: which physical interface to open

use std::fmt;

use hidlink_transport::DeviceFilter;
use thiserror::Error;

/// Malformed identity field
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("{field} '{value}' is not a valid hexadecimal value")]
    InvalidHex { field: &'static str, value: String },

    #[error("{field} is not set")]
    Missing { field: &'static str },

    #[error("UsagePage and Usage must be given together")]
    PartialUsage,
}

/// Immutable descriptor used to select one device among those enumerated
///
/// Selection uses vendor/product only unless both `usage_page` and `usage`
/// are present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    display_name: String,
    vendor_id: u16,
    product_id: u16,
    usage_page: Option<u16>,
    usage: Option<u16>,
}

impl DeviceIdentity {
    pub fn new(display_name: impl Into<String>, vendor_id: u16, product_id: u16) -> Self {
        Self {
            display_name: display_name.into(),
            vendor_id,
            product_id,
            usage_page: None,
            usage: None,
        }
    }

    pub fn with_usage(mut self, usage_page: u16, usage: u16) -> Self {
        self.usage_page = Some(usage_page);
        self.usage = Some(usage);
        self
    }

    /// Build an identity from its textual fields
    ///
    /// Numeric fields are hexadecimal, with or without a `0x` prefix.
    /// `usage_page` and `usage` must both be given or both be absent.
    pub fn parse(
        display_name: &str,
        vendor_id: &str,
        product_id: &str,
        usage_page: Option<&str>,
        usage: Option<&str>,
    ) -> Result<Self, IdentityError> {
        let display_name = display_name.trim();
        if display_name.is_empty() {
            return Err(IdentityError::Missing {
                field: "DeviceName",
            });
        }

        let identity = Self::new(
            display_name,
            parse_hex_u16("VendorID", vendor_id)?,
            parse_hex_u16("ProductID", product_id)?,
        );
        match (usage_page, usage) {
            (Some(page), Some(usage)) => Ok(identity.with_usage(
                parse_hex_u16("UsagePage", page)?,
                parse_hex_u16("Usage", usage)?,
            )),
            (None, None) => Ok(identity),
            _ => Err(IdentityError::PartialUsage),
        }
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn vendor_id(&self) -> u16 {
        self.vendor_id
    }

    pub fn product_id(&self) -> u16 {
        self.product_id
    }

    pub fn usage_page(&self) -> Option<u16> {
        self.usage_page
    }

    pub fn usage(&self) -> Option<u16> {
        self.usage
    }

    /// Usage page and usage, when selection should filter on them
    pub fn usage_filter(&self) -> Option<(u16, u16)> {
        self.usage_page.zip(self.usage)
    }

    /// Enumeration filter for this identity
    pub fn filter(&self) -> DeviceFilter {
        let filter = DeviceFilter::new(self.vendor_id, self.product_id);
        match self.usage_filter() {
            Some((page, _)) => filter.with_usage_page(page),
            None => filter,
        }
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}:{}",
            self.display_name,
            format_hex_u16(self.vendor_id),
            format_hex_u16(self.product_id)
        )?;
        if let Some((page, usage)) = self.usage_filter() {
            write!(
                f,
                " page={} usage={}",
                format_hex_u16(page),
                format_hex_u16(usage)
            )?;
        }
        write!(f, ")")
    }
}

/// Parse a 16-bit hexadecimal field, `0x` prefix optional
pub fn parse_hex_u16(field: &'static str, value: &str) -> Result<u16, IdentityError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(IdentityError::Missing { field });
    }
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    u16::from_str_radix(digits, 16).map_err(|_| IdentityError::InvalidHex {
        field,
        value: value.to_string(),
    })
}

/// Format as `0x` + four uppercase hex digits
pub fn format_hex_u16(value: u16) -> String {
    format!("0x{:04X}", value)
}
