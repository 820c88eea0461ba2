//! Vulnerability record types.
//!
//! Every optional field is left out of the encoding when empty, and missing
//! fields decode to their defaults, so records written by newer code with
//! extra fields still read back.

use crate::provenance::{DataSource, SourceId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use time::OffsetDateTime;

/// How bad a vulnerability is, as judged by one source.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    /// Not rated.
    #[default]
    Unknown,
    /// Low.
    Low,
    /// Medium.
    Medium,
    /// High.
    High,
    /// Critical.
    Critical,
}

impl Severity {
    /// Returns `true` for [`Severity::Unknown`].
    #[must_use]
    pub fn is_unknown(&self) -> bool {
        *self == Self::Unknown
    }

    /// Parses a severity name case-insensitively. Unrecognized names are
    /// [`Severity::Unknown`].
    #[must_use]
    pub fn parse(name: &str) -> Self {
        match name.to_ascii_uppercase().as_str() {
            "LOW" => Self::Low,
            "MEDIUM" | "MODERATE" => Self::Medium,
            "HIGH" | "IMPORTANT" => Self::High,
            "CRITICAL" => Self::Critical,
            _ => Self::Unknown,
        }
    }

    /// The upper-case name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fix state of a package for one advisory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// The package is not affected.
    NotAffected,
    /// Affected, no fix yet.
    Affected,
    /// A fixed version exists.
    Fixed,
    /// The vendor is investigating.
    UnderInvestigation,
    /// The vendor will not fix it.
    WillNotFix,
    /// The fix is postponed.
    FixDeferred,
    /// The product is out of support.
    EndOfLife,
}

/// What one source says about one package and one vulnerability.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct Advisory {
    /// Vulnerability identifier. Filled in from the key when read back.
    #[serde(rename = "VulnerabilityID", skip_serializing_if = "String::is_empty")]
    pub vulnerability_id: String,
    /// Vendor advisory identifiers, such as RHSA or DSA numbers.
    #[serde(rename = "VendorIDs", skip_serializing_if = "Vec::is_empty")]
    pub vendor_ids: Vec<String>,
    /// Affected architectures.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub arches: Vec<String>,
    /// Fix state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    /// Source-specific severity.
    #[serde(skip_serializing_if = "Severity::is_unknown")]
    pub severity: Severity,
    /// First fixed version.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub fixed_version: String,
    /// Affected version.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub affected_version: String,
    /// Vulnerable version ranges.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub vulnerable_versions: Vec<String>,
    /// Patched version ranges.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub patched_versions: Vec<String>,
    /// Unaffected version ranges.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unaffected_versions: Vec<String>,
    /// Provenance, filled in from the registry when read back.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_source: Option<DataSource>,
    /// Source-specific extra data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom: Option<ciborium::Value>,
}

/// What one source says about a vulnerability, independent of packages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct VulnerabilityDetail {
    /// Identifier, such as a CVE or OSVDB ID.
    #[serde(rename = "ID", skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// CVSS v2 base score.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cvss_score: Option<f64>,
    /// CVSS v2 vector.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub cvss_vector: String,
    /// CVSS v3 base score.
    #[serde(rename = "CvssScoreV3", skip_serializing_if = "Option::is_none")]
    pub cvss_score_v3: Option<f64>,
    /// CVSS v3 vector.
    #[serde(rename = "CvssVectorV3", skip_serializing_if = "String::is_empty")]
    pub cvss_vector_v3: String,
    /// CVSS v4.0 base score.
    #[serde(rename = "CvssScoreV40", skip_serializing_if = "Option::is_none")]
    pub cvss_score_v40: Option<f64>,
    /// CVSS v4.0 vector.
    #[serde(rename = "CvssVectorV40", skip_serializing_if = "String::is_empty")]
    pub cvss_vector_v40: String,
    /// Overall severity.
    #[serde(skip_serializing_if = "Severity::is_unknown")]
    pub severity: Severity,
    /// CVSS v3 severity.
    #[serde(rename = "SeverityV3", skip_serializing_if = "Severity::is_unknown")]
    pub severity_v3: Severity,
    /// CVSS v4.0 severity.
    #[serde(rename = "SeverityV40", skip_serializing_if = "Severity::is_unknown")]
    pub severity_v40: Severity,
    /// Weakness identifiers, such as `CWE-78`.
    #[serde(rename = "CweIDs", skip_serializing_if = "Vec::is_empty")]
    pub cwe_ids: Vec<String>,
    /// Reference links.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<String>,
    /// Short title.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub title: String,
    /// Long description.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// First publication.
    #[serde(
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub published_date: Option<OffsetDateTime>,
    /// Last modification.
    #[serde(
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_modified_date: Option<OffsetDateTime>,
}

/// CVSS vectors and scores from one source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Cvss {
    /// CVSS v2 vector.
    #[serde(rename = "V2Vector", skip_serializing_if = "String::is_empty")]
    pub v2_vector: String,
    /// CVSS v3 vector.
    #[serde(rename = "V3Vector", skip_serializing_if = "String::is_empty")]
    pub v3_vector: String,
    /// CVSS v4.0 vector.
    #[serde(rename = "V40Vector", skip_serializing_if = "String::is_empty")]
    pub v40_vector: String,
    /// CVSS v2 score.
    #[serde(rename = "V2Score", skip_serializing_if = "Option::is_none")]
    pub v2_score: Option<f64>,
    /// CVSS v3 score.
    #[serde(rename = "V3Score", skip_serializing_if = "Option::is_none")]
    pub v3_score: Option<f64>,
    /// CVSS v4.0 score.
    #[serde(rename = "V40Score", skip_serializing_if = "Option::is_none")]
    pub v40_score: Option<f64>,
}

/// A vulnerability merged across sources, ready for display.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct Vulnerability {
    /// Short title.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub title: String,
    /// Long description.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Severity picked from `vendor_severity` for the scan target.
    #[serde(skip_serializing_if = "Severity::is_unknown")]
    pub severity: Severity,
    /// Weakness identifiers.
    #[serde(rename = "CweIDs", skip_serializing_if = "Vec::is_empty")]
    pub cwe_ids: Vec<String>,
    /// Severity according to each source.
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub vendor_severity: HashMap<SourceId, Severity>,
    /// CVSS data according to each source.
    #[serde(rename = "CVSS", skip_serializing_if = "HashMap::is_empty")]
    pub cvss: HashMap<SourceId, Cvss>,
    /// Reference links.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<String>,
    /// First publication.
    #[serde(
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub published_date: Option<OffsetDateTime>,
    /// Last modification.
    #[serde(
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_modified_date: Option<OffsetDateTime>,
    /// Source-specific extra data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom: Option<ciborium::Value>,
}
