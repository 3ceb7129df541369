//! MMS address parsing (OMA MMS encapsulation, section 8).

/// What kind of endpoint an address refers to.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AddressKind {
    /// A phone number (`/TYPE=PLMN`).
    Phone,
    /// An RFC 5322 mailbox.
    Email,
    /// A dotted IPv4 address (`/TYPE=IPv4`).
    Ipv4,
    /// Anything else, kept verbatim.
    Other,
}

/// A parsed MMS address.
///
/// # Examples
/// - `"+15551234/TYPE=PLMN"` → `kind = Phone`, `value = "+15551234"`
/// - `"+15551234"` → `kind = Phone`, `value = "+15551234"`
/// - `"user@example.com"` → `kind = Email`, `value = "user@example.com"`
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct MmsAddress {
    pub kind: AddressKind,
    /// The address without any `/TYPE=` suffix.
    pub value: String,
}

impl MmsAddress {
    /// Parse a single address.
    ///
    /// An explicit `/TYPE=` suffix wins; otherwise the kind is guessed
    /// from the shape of the value.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();

        if let Some((value, ty)) = trimmed.rsplit_once("/TYPE=") {
            let kind = match ty.to_ascii_uppercase().as_str() {
                "PLMN" => AddressKind::Phone,
                "IPV4" => AddressKind::Ipv4,
                _ => AddressKind::Other,
            };
            return Self {
                kind,
                value: value.trim().to_string(),
            };
        }

        let kind = if trimmed.contains('@') {
            AddressKind::Email
        } else if is_phone_number(trimmed) {
            AddressKind::Phone
        } else if trimmed.parse::<std::net::Ipv4Addr>().is_ok() {
            AddressKind::Ipv4
        } else {
            AddressKind::Other
        };
        Self {
            kind,
            value: trimmed.to_string(),
        }
    }

    /// Parse a list of addresses separated by `,` or `;`.
    pub fn parse_list(raw: &str) -> Vec<Self> {
        raw.split([',', ';'])
            .map(Self::parse)
            .filter(|a| !a.value.is_empty())
            .collect()
    }

    /// Format the address the way it is encoded on the wire.
    pub fn encoded(&self) -> String {
        match self.kind {
            AddressKind::Phone => format!("{}/TYPE=PLMN", self.value),
            AddressKind::Ipv4 => format!("{}/TYPE=IPv4", self.value),
            AddressKind::Email | AddressKind::Other => self.value.clone(),
        }
    }
}

/// Digits with an optional leading `+`, allowing common separators.
fn is_phone_number(s: &str) -> bool {
    let digits = s.strip_prefix('+').unwrap_or(s);
    !digits.is_empty()
        && digits.chars().any(|c| c.is_ascii_digit())
        && digits
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '-' | ' ' | '(' | ')'))
}

impl std::fmt::Display for MmsAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.encoded())
    }
}
