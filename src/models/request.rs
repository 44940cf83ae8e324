/// Request metadata the pipeline hands to the gate. Only what the ledger
/// needs to attribute a denied attempt; payload inspection is out of scope.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub endpoint: String,
    pub user_id: Option<String>,
    pub user_agent: Option<String>,
}

impl RequestContext {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            user_id: None,
            user_agent: None,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }
}
