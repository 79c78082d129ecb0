use std::time::Instant;

/// Health verdict of the proxy a worker currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Validity {
    /// Issued but not yet checked
    #[default]
    Unknown,
    Valid,
    Invalid,
}

/// Per-worker proxy state. Never shared across processes and never persisted.
#[derive(Debug, Clone, Default)]
pub struct ProxyState {
    pub url: Option<String>,
    pub valid: Validity,
    /// Number of proxies issued to this worker so far
    pub used_count: u64,
    pub last_check_time: Option<Instant>,
    /// A recheck already ran since the last failure
    pub rechecked: bool,
}

impl ProxyState {
    pub fn new() -> Self {
        Self::default()
    }

    /// The url, but only while it may be attached to requests.
    pub fn valid_url(&self) -> Option<&str> {
        match self.valid {
            Validity::Valid => self.url.as_deref(),
            _ => None,
        }
    }

    pub fn holds(&self, proxy: &str) -> bool {
        self.url.as_deref() == Some(proxy)
    }

    /// Installs a freshly issued proxy.
    pub fn issue(&mut self, url: String) {
        self.url = Some(url);
        self.valid = Validity::Unknown;
        self.used_count += 1;
        self.rechecked = false;
        self.last_check_time = None;
    }

    /// Records a health verdict; a state without a url can never become valid.
    pub fn record_check(&mut self, healthy: bool) {
        self.last_check_time = Some(Instant::now());
        self.valid = if healthy && self.url.is_some() {
            Validity::Valid
        } else {
            Validity::Invalid
        };
    }

    pub fn invalidate(&mut self) {
        self.valid = Validity::Invalid;
    }
}
