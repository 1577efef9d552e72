//! Request metadata recorded on new sessions: a coarse device class derived
//! from the user agent and an optional geo label for the client IP.

/// Device bucket shown on the "active sessions" page.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceClass {
    Mobile,
    Tablet,
    Desktop,
}

impl DeviceClass {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mobile => "Mobile",
            Self::Tablet => "Tablet",
            Self::Desktop => "Desktop",
        }
    }
}

/// Classify a user agent string into a coarse device bucket.
///
/// Tablets are checked first: Android tablets advertise `android` and iPads
/// ship `Mobile` in some UA strings, so the more specific markers win.
#[must_use]
pub fn classify_device(user_agent: &str) -> DeviceClass {
    let ua = user_agent.to_ascii_lowercase();
    if ua.contains("ipad") || ua.contains("tablet") {
        DeviceClass::Tablet
    } else if ua.contains("mobi") || ua.contains("iphone") || ua.contains("android") {
        DeviceClass::Mobile
    } else {
        DeviceClass::Desktop
    }
}

/// Coarse location attached to a session at login.
#[derive(Clone, Debug)]
pub struct GeoLocation {
    pub city: String,
    pub subdivision: String,
    pub country: String,
}

impl GeoLocation {
    /// Human-readable label stored on the session row, e.g. `Seoul, KR`.
    /// Empty components are skipped.
    #[must_use]
    pub fn label(&self) -> String {
        let mut parts: Vec<&str> = Vec::new();
        for part in [&self.city, &self.subdivision, &self.country] {
            let trimmed = part.trim();
            if !trimmed.is_empty() {
                parts.push(trimmed);
            }
        }
        parts.join(", ")
    }
}

/// IP-to-location lookup. Implementations may consult a local database or an
/// external service; lookups are advisory and never block a login.
pub trait GeoLocator: Send + Sync {
    fn locate(&self, ip: &str) -> Option<GeoLocation>;
}

/// Locator used when no geo backend is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopGeoLocator;

impl GeoLocator for NoopGeoLocator {
    fn locate(&self, _ip: &str) -> Option<GeoLocation> {
        None
    }
}
