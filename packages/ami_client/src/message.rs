use std::collections::HashMap;

/// One block of `Key: Value` lines received from the manager interface.
///
/// Field order is preserved and keys may repeat; lookups return the first
/// match and ignore ASCII case, the same way the server treats them.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AmiMessage {
    fields: Vec<(String, String)>,
}

impl AmiMessage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.push((key.into(), value.into()));
    }

    /// Builder-style variant of [`push`](Self::push), handy in tests.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn event(&self) -> Option<&str> {
        self.get("Event")
    }

    pub fn response(&self) -> Option<&str> {
        self.get("Response")
    }

    pub fn action_id(&self) -> Option<&str> {
        self.get("ActionID")
    }

    pub fn message(&self) -> Option<&str> {
        self.get("Message")
    }

    pub fn is_event(&self) -> bool {
        self.event().is_some()
    }

    pub fn is_response(&self) -> bool {
        self.response().is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Flatten into a map. Repeated keys keep their first value.
    pub fn to_map(&self) -> HashMap<String, String> {
        let mut map = HashMap::with_capacity(self.fields.len());
        for (k, v) in &self.fields {
            map.entry(k.clone()).or_insert_with(|| v.clone());
        }
        map
    }
}

/// An outbound request (`Action: <name>` plus headers).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Action {
    name: String,
    headers: Vec<(String, String)>,
}

impl Action {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            headers: Vec::new(),
        }
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn action_id(&self) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("ActionID"))
            .map(|(_, v)| v.as_str())
    }

    pub(crate) fn ensure_action_id(&mut self, fallback: impl FnOnce() -> String) -> String {
        if let Some(id) = self.action_id() {
            return id.to_string();
        }
        let id = fallback();
        self.headers.push(("ActionID".to_string(), id.clone()));
        id
    }

    /// Wire encoding: header lines terminated by `\r\n`, block terminated by an empty line.
    pub fn encode(&self) -> String {
        let mut out = format!("Action: {}\r\n", self.name);
        for (k, v) in &self.headers {
            out.push_str(k);
            out.push_str(": ");
            out.push_str(v);
            out.push_str("\r\n");
        }
        out.push_str("\r\n");
        out
    }
}
