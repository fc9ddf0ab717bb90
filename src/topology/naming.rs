//! Pluggable naming for exchanges and queues.

/// Formats the exchange/topic name of a message type.
pub trait EntityNameFormatter: Send + Sync {
    fn format_entity_name(&self, namespace: &str, name: &str) -> String;
}

/// Formats queue names.
pub trait EndpointNameFormatter: Send + Sync {
    /// Default queue for a consumer of the message named `message_name`.
    fn consumer_queue_name(&self, message_name: &str) -> String;

    /// Name of a request client's temporary reply queue.
    fn temporary_queue_name(&self, host: &str, process: &str, id: &str) -> String {
        format!("{}_{}_bus_{id}", sanitize(host), sanitize(process))
    }
}

/// `{namespace}:{typeName}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultEntityNameFormatter;

impl EntityNameFormatter for DefaultEntityNameFormatter {
    fn format_entity_name(&self, namespace: &str, name: &str) -> String {
        format!("{namespace}:{name}")
    }
}

/// Kebab-case queue names suffixed `-consumer`, with an optional prefix.
///
/// `SubmitOrder` → `submit-order-consumer`; with prefix `orders`,
/// `orders-submit-order-consumer`.
#[derive(Debug, Clone, Default)]
pub struct KebabCaseEndpointNameFormatter {
    prefix: Option<String>,
}

impl KebabCaseEndpointNameFormatter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        let prefix = kebab_case(&prefix.into());
        Self {
            prefix: (!prefix.is_empty()).then_some(prefix),
        }
    }
}

impl EndpointNameFormatter for KebabCaseEndpointNameFormatter {
    fn consumer_queue_name(&self, message_name: &str) -> String {
        let base = kebab_case(message_name);
        match &self.prefix {
            Some(prefix) => format!("{prefix}-{base}-consumer"),
            None => format!("{base}-consumer"),
        }
    }
}

/// Lower-case a type name, splitting words with `-` and replacing
/// punctuation. `HTTPRequestSent` → `http-request-sent`,
/// `Batch[[Telemetry:Reading]]` → `batch-telemetry-reading`.
pub fn kebab_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);

    for (i, &c) in chars.iter().enumerate() {
        if c.is_alphanumeric() {
            if c.is_uppercase() && i > 0 {
                let prev = chars[i - 1];
                let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
                let boundary = prev.is_lowercase()
                    || prev.is_ascii_digit()
                    || (prev.is_uppercase() && next_is_lower);
                if boundary && !out.ends_with('-') {
                    out.push('-');
                }
            }
            out.extend(c.to_lowercase());
        } else if !out.is_empty() && !out.ends_with('-') {
            out.push('-');
        }
    }

    while out.ends_with('-') {
        out.pop();
    }
    out
}

fn sanitize(part: &str) -> String {
    let cleaned: String = part
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect();
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned
    }
}
