use finpipe_core::JobKind;

/// Redis key layout under a configurable prefix.
///
/// | Key | Type | Contents |
/// |-----|------|----------|
/// | `{prefix}:staged` | hash | cache key -> JSON quote record |
/// | `{prefix}:quarantine` | hash | cache key -> raw rejected value |
/// | `{prefix}:lock:{job}` | string | holder token, with TTL |
/// | `{prefix}:reports` | list | JSON cycle reports from one-shot runs |
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeySpace {
    prefix: String,
}

impl KeySpace {
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let prefix = prefix.trim_end_matches(':');
        Self {
            prefix: if prefix.is_empty() {
                "finpipe".to_string()
            } else {
                prefix.to_string()
            },
        }
    }

    pub fn staged(&self) -> String {
        format!("{}:staged", self.prefix)
    }

    pub fn quarantine(&self) -> String {
        format!("{}:quarantine", self.prefix)
    }

    pub fn reports(&self) -> String {
        format!("{}:reports", self.prefix)
    }

    pub fn lock(&self, job: JobKind) -> String {
        format!("{}:lock:{}", self.prefix, job.as_str())
    }
}

impl Default for KeySpace {
    fn default() -> Self {
        Self::new("finpipe")
    }
}
