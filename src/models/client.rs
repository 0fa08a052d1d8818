//! Represents the requesting client, parsed from positional URL segments.

use serde::{Deserialize, Serialize};

/// Rendering family selected by the client's startpage version.
///
/// Startpage version 5 ships the "activity stream" about:home and expects a
/// different document wrapper than versions 1-4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateFamily {
    Default,
    ActivityStream,
}

impl TemplateFamily {
    pub fn as_str(self) -> &'static str {
        match self {
            TemplateFamily::Default => "default",
            TemplateFamily::ActivityStream => "activity_stream",
        }
    }
}

/// Normalized attributes of a requesting client.
///
/// Immutable after construction; the full tuple of fields (plus the derived
/// template family) identifies a client for caching purposes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientDescriptor {
    pub startpage_version: String,
    pub name: String,
    pub version: String,
    pub appbuildid: String,
    pub build_target: String,
    pub locale: String,
    pub channel: String,
    pub os_version: String,
    pub distribution: String,
    pub distribution_version: String,
}

impl ClientDescriptor {
    /// Look up a client attribute by its field name, as used by per-field
    /// match rules. Unknown names return `None`.
    pub fn field(&self, name: &str) -> Option<&str> {
        let value = match name {
            "startpage_version" => &self.startpage_version,
            "name" => &self.name,
            "version" => &self.version,
            "appbuildid" => &self.appbuildid,
            "build_target" => &self.build_target,
            "locale" => &self.locale,
            "channel" => &self.channel,
            "os_version" => &self.os_version,
            "distribution" => &self.distribution,
            "distribution_version" => &self.distribution_version,
            _ => return None,
        };
        Some(value.as_str())
    }

    pub fn template_family(&self) -> TemplateFamily {
        if self.startpage_version == "5" {
            TemplateFamily::ActivityStream
        } else {
            TemplateFamily::Default
        }
    }

    /// All fields in a fixed order, for cache key derivation.
    pub fn fingerprint_fields(&self) -> [&str; 10] {
        [
            &self.startpage_version,
            &self.name,
            &self.version,
            &self.appbuildid,
            &self.build_target,
            &self.locale,
            &self.channel,
            &self.os_version,
            &self.distribution,
            &self.distribution_version,
        ]
    }
}
