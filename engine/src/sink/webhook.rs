use super::{
    MessageField,
    NotificationSink,
    SinkError,
    StructuredMessage,
};
use futures::future::BoxFuture;
use reqwest::Client as HttpClient;
use serde_json::{
    json,
    Value,
};
use url::Url;

/// Longest `content` a webhook post may carry.
const MAX_CONTENT_LEN: usize = 2000;

/// Posts to a Discord compatible webhook.
#[derive(Debug, Clone)]
pub struct WebhookSink {
    client: HttpClient,
    url: Url,
    username: Option<String>,
}

impl WebhookSink {
    pub fn new(client: HttpClient, url: Url, username: Option<String>) -> Self {
        Self { client, url, username }
    }

    async fn post(&self, mut body: Value) -> Result<(), SinkError> {
        if let (Some(username), Some(object)) = (&self.username, body.as_object_mut()) {
            object.insert("username".to_string(), json!(username));
        }

        self.client
            .post(self.url.clone())
            .json(&body)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map(|_| ())
            .map_err(|err| SinkError::Delivery(err.without_url().to_string()))
    }
}

/// Discord rejects embeds past these limits with a 400.
const MAX_FIELDS: usize = 25;
const MAX_FIELD_NAME_LEN: usize = 256;
const MAX_FIELD_VALUE_LEN: usize = 1024;
const MAX_TITLE_LEN: usize = 256;
const MAX_DESCRIPTION_LEN: usize = 4096;
const MAX_FOOTER_LEN: usize = 2048;
const MAX_EMBED_LEN: usize = 6000;
/// Room kept back for the field that folds whatever did not fit.
const OVERFLOW_RESERVE: usize = MAX_FIELD_VALUE_LEN + 32;

/// Cuts `text` to at most `max` chars, marking the cut with an ellipsis.
fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max.saturating_sub(1)).collect();
    cut.push('…');
    cut
}

fn len(text: &str) -> usize {
    text.chars().count()
}

/// Field list that stays within the field count and the remaining embed
/// budget. Fields that do not fit are folded into one trailing field.
fn embed_fields(fields: &[MessageField], budget: usize) -> Vec<Value> {
    let mut budget = budget.saturating_sub(OVERFLOW_RESERVE);
    let mut out = Vec::with_capacity(fields.len().min(MAX_FIELDS));
    let mut overflow: &[MessageField] = &[];

    for (index, field) in fields.iter().enumerate() {
        let name = truncate(&field.name, MAX_FIELD_NAME_LEN);
        let value = truncate(&field.value, MAX_FIELD_VALUE_LEN);
        let size = len(&name) + len(&value);
        let last_slot = out.len() == MAX_FIELDS - 1 && index + 1 < fields.len();
        if last_slot || size > budget {
            overflow = &fields[index..];
            break;
        }
        budget -= size;
        out.push(json!({ "name": name, "value": value, "inline": field.inline }));
    }

    if !overflow.is_empty() {
        let lines = overflow
            .iter()
            .map(|field| format!("{}: {}", field.name, field.value))
            .collect::<Vec<_>>()
            .join("\n");
        out.push(json!({
            "name": format!("{} more", overflow.len()),
            "value": truncate(&lines, MAX_FIELD_VALUE_LEN),
            "inline": false,
        }));
    }
    out
}

pub(crate) fn embed(message: &StructuredMessage) -> Value {
    let title = truncate(&message.title, MAX_TITLE_LEN);
    let description = message
        .description
        .as_deref()
        .map(|description| truncate(description, MAX_DESCRIPTION_LEN));
    let footer = message.footer.as_deref().map(|footer| truncate(footer, MAX_FOOTER_LEN));
    let used = len(&title) + description.as_deref().map_or(0, len) + footer.as_deref().map_or(0, len);

    let mut embed = json!({
        "title": title,
        "color": message.color,
        "fields": embed_fields(&message.fields, MAX_EMBED_LEN.saturating_sub(used)),
    });
    if let Some(description) = description {
        embed["description"] = json!(description);
    }
    if let Some(footer) = footer {
        embed["footer"] = json!({ "text": footer });
    }
    if let Some(timestamp) = &message.timestamp {
        embed["timestamp"] = json!(timestamp.to_rfc3339());
    }
    embed
}

/// Wraps the text in a code block so tables keep their alignment, cutting it
/// to fit the content limit.
pub(crate) fn content(text: &str) -> String {
    const FENCE: &str = "```";
    let budget = MAX_CONTENT_LEN - 2 * FENCE.len() - 2;
    format!("{FENCE}\n{}\n{FENCE}", truncate(text, budget))
}

impl NotificationSink for WebhookSink {
    fn send_structured<'a>(&'a self, message: &'a StructuredMessage) -> BoxFuture<'a, Result<(), SinkError>> {
        Box::pin(self.post(json!({ "embeds": [embed(message)] })))
    }

    fn send_text<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<(), SinkError>> {
        Box::pin(self.post(json!({ "content": content(text) })))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::sink::COLOR_WARNING;
    use pretty_assertions::assert_eq;

    #[test]
    fn embed_shape() {
        let message = StructuredMessage {
            title: "Performance alert".to_string(),
            description: Some("nauvis is slow".to_string()),
            color: COLOR_WARNING,
            fields: vec![MessageField::new("UPS", "27.0", true)],
            footer: Some("nauvis".to_string()),
            timestamp: None,
        };

        assert_eq!(
            embed(&message),
            json!({
                "title": "Performance alert",
                "description": "nauvis is slow",
                "color": COLOR_WARNING,
                "fields": [{ "name": "UPS", "value": "27.0", "inline": true }],
                "footer": { "text": "nauvis" },
            })
        );
    }

    #[test]
    fn content_is_fenced_and_bounded() {
        assert_eq!(content("a | b"), "```\na | b\n```");

        let long = "x".repeat(5000);
        let fenced = content(&long);
        assert_eq!(fenced.chars().count(), MAX_CONTENT_LEN);
        assert!(fenced.ends_with("…\n```"));
    }

    fn embed_size(embed: &Value) -> usize {
        let text = |value: &Value| value.as_str().map_or(0, len);
        let fields: usize = embed["fields"]
            .as_array()
            .unwrap()
            .iter()
            .map(|field| text(&field["name"]) + text(&field["value"]))
            .sum();
        text(&embed["title"]) + text(&embed["description"]) + text(&embed["footer"]["text"]) + fields
    }

    #[test]
    fn many_surfaces_are_folded_into_one_field() {
        let players: Vec<String> = (0..120).map(|i| format!("engineer-{i:03}")).collect();
        let mut fields = vec![
            MessageField::new("UPS", "59.8", true),
            MessageField::new("Players", players.len().to_string(), true),
            MessageField::new("Online", players.join(", "), false),
        ];
        fields.extend((0..31).map(|i| MessageField::new(format!("Evolution: platform-{i}"), "12.00%", true)));
        let message = StructuredMessage {
            title: "Server status: nauvis".to_string(),
            description: None,
            color: COLOR_WARNING,
            fields,
            footer: Some("nauvis".to_string()),
            timestamp: None,
        };

        let embed = embed(&message);
        let fields = embed["fields"].as_array().unwrap();
        assert_eq!(fields.len(), MAX_FIELDS);
        for field in fields {
            assert!(len(field["value"].as_str().unwrap()) <= MAX_FIELD_VALUE_LEN, "{field}");
        }
        assert!(fields[2]["value"].as_str().unwrap().ends_with('…'));

        let last = &fields[MAX_FIELDS - 1];
        assert_eq!(last["name"], json!("10 more"));
        assert!(last["value"].as_str().unwrap().starts_with("Evolution: platform-21: 12.00%"));
        assert!(embed_size(&embed) <= MAX_EMBED_LEN);
    }

    #[test]
    fn long_fields_stay_within_the_embed_budget() {
        let message = StructuredMessage {
            title: "Server status: nauvis".to_string(),
            description: Some("d".repeat(5000)),
            color: COLOR_WARNING,
            fields: (0..10).map(|i| MessageField::new(format!("field {i}"), "v".repeat(1500), false)).collect(),
            footer: None,
            timestamp: None,
        };

        let embed = embed(&message);
        assert_eq!(len(embed["description"].as_str().unwrap()), MAX_DESCRIPTION_LEN);
        assert!(embed_size(&embed) <= MAX_EMBED_LEN, "{}", embed_size(&embed));
        let fields = embed["fields"].as_array().unwrap();
        assert_eq!(fields.last().unwrap()["name"], json!("10 more"));
    }

    #[test]
    fn exactly_max_fields_are_kept_as_is() {
        let message = StructuredMessage {
            title: "t".to_string(),
            description: None,
            color: COLOR_WARNING,
            fields: (0..MAX_FIELDS).map(|i| MessageField::new(format!("f{i}"), "1", true)).collect(),
            footer: None,
            timestamp: None,
        };

        let fields = embed(&message)["fields"].as_array().unwrap().clone();
        assert_eq!(fields.len(), MAX_FIELDS);
        assert_eq!(fields[MAX_FIELDS - 1]["name"], json!("f24"));
    }

    #[tokio::test]
    async fn stalled_webhook_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = Url::parse(&format!("http://{}/hook", listener.local_addr().unwrap())).unwrap();
        // accepts the connection and never answers
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                held.push(stream);
            }
        });

        let client = HttpClient::builder()
            .connect_timeout(std::time::Duration::from_millis(200))
            .timeout(std::time::Duration::from_millis(200))
            .build()
            .unwrap();
        let sink = WebhookSink::new(client, url, None);

        let result = tokio::time::timeout(std::time::Duration::from_secs(5), sink.send_text("nauvis"))
            .await
            .expect("delivery was left pending");
        assert!(matches!(result, Err(SinkError::Delivery(_))), "{result:?}");
        server.abort();
    }
}
