/// Low-cardinality labels attached to pipeline metrics.
#[derive(Debug, Clone, Default)]
pub struct TelemetryLabels {
    pub channel_type: Option<String>,
    pub kind: Option<String>,
    pub extra: Vec<(String, String)>,
}

impl TelemetryLabels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn channel_type(mut self, channel_type: impl Into<String>) -> Self {
        self.channel_type = Some(channel_type.into());
        self
    }

    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.push((key.into(), value.into()));
        self
    }

    pub fn tags(&self) -> Vec<(String, String)> {
        let mut tags = Vec::with_capacity(2 + self.extra.len());
        if let Some(channel_type) = &self.channel_type {
            tags.push(("channel_type".into(), channel_type.clone()));
        }
        if let Some(kind) = &self.kind {
            tags.push(("kind".into(), kind.clone()));
        }
        for (key, value) in &self.extra {
            tags.push((key.clone(), value.clone()));
        }
        tags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_keep_insertion_order() {
        let labels = TelemetryLabels::new()
            .channel_type("EX")
            .kind("msgs")
            .with("outcome", "spooled");
        assert_eq!(
            labels.tags(),
            vec![
                ("channel_type".to_string(), "EX".to_string()),
                ("kind".to_string(), "msgs".to_string()),
                ("outcome".to_string(), "spooled".to_string()),
            ]
        );
    }
}
