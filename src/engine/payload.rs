// Request bodies for the backend's create and retry endpoints.

use serde::Serialize;
use serde_json::Value;

use super::session::SessionState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEvaluation<'a> {
    pub id: String,
    pub mode: &'static str,
    pub model_a_id: &'a str,
    pub user_message_id: &'a str,
    pub model_a_message_id: &'a str,
    pub modality: &'static str,
    pub messages: Vec<EvaluationMessage<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryEvaluation<'a> {
    pub messages: Vec<EvaluationMessage<'a>>,
    pub model_id: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationMessage<'a> {
    pub id: &'a str,
    pub role: &'static str,
    pub content: &'a str,
    #[serde(rename = "experimental_attachments")]
    pub experimental_attachments: Vec<Value>,
    pub parent_message_ids: Vec<&'a str>,
    pub participant_position: &'static str,
    pub model_id: Option<&'a str>,
    pub evaluation_session_id: &'a str,
    pub status: &'static str,
    pub failure_reason: Option<Value>,
}

impl<'a> EvaluationMessage<'a> {
    fn pending(
        id: &'a str,
        role: &'static str,
        content: &'a str,
        session_id: &'a str,
    ) -> Self {
        Self {
            id,
            role,
            content,
            experimental_attachments: Vec::new(),
            parent_message_ids: Vec::new(),
            participant_position: "a",
            model_id: None,
            evaluation_session_id: session_id,
            status: "pending",
            failure_reason: None,
        }
    }

    pub fn user(session: &'a SessionState, prompt: &'a str) -> Self {
        Self::pending(&session.user_message_id, "user", prompt, &session.session_id)
    }

    /// Empty assistant slot the backend streams the model's answer into.
    pub fn assistant_placeholder(session: &'a SessionState) -> Self {
        let mut msg = Self::pending(&session.model_message_id, "assistant", "", &session.session_id);
        msg.parent_message_ids.push(&session.user_message_id);
        msg.model_id = Some(&session.model_id);
        msg
    }
}

impl<'a> CreateEvaluation<'a> {
    pub fn new(request_id: String, session: &'a SessionState, prompt: &'a str) -> Self {
        Self {
            id: request_id,
            mode: "direct",
            model_a_id: &session.model_id,
            user_message_id: &session.user_message_id,
            model_a_message_id: &session.model_message_id,
            modality: "chat",
            messages: vec![
                EvaluationMessage::user(session, prompt),
                EvaluationMessage::assistant_placeholder(session),
            ],
        }
    }
}

impl<'a> RetryEvaluation<'a> {
    pub fn new(session: &'a SessionState, prompt: &'a str, model_id: &'a str) -> Self {
        Self {
            messages: vec![EvaluationMessage::user(session, prompt)],
            model_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn session() -> SessionState {
        SessionState {
            session_id: "sess".to_string(),
            user_message_id: "user-msg".to_string(),
            model_message_id: "model-msg".to_string(),
            model_id: "model-x".to_string(),
        }
    }

    #[test]
    fn test_create_evaluation_shape() {
        let session = session();
        let body = serde_json::to_value(CreateEvaluation::new("req".to_string(), &session, "hi"))
            .unwrap();

        assert_eq!(body["id"], "req");
        assert_eq!(body["mode"], "direct");
        assert_eq!(body["modelAId"], "model-x");
        assert_eq!(body["userMessageId"], "user-msg");
        assert_eq!(body["modelAMessageId"], "model-msg");
        assert_eq!(body["modality"], "chat");

        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(
            messages[0],
            json!({
                "id": "user-msg",
                "role": "user",
                "content": "hi",
                "experimental_attachments": [],
                "parentMessageIds": [],
                "participantPosition": "a",
                "modelId": null,
                "evaluationSessionId": "sess",
                "status": "pending",
                "failureReason": null
            })
        );
        assert_eq!(messages[1]["role"], "assistant");
        assert_eq!(messages[1]["content"], "");
        assert_eq!(messages[1]["modelId"], "model-x");
        assert_eq!(messages[1]["parentMessageIds"], json!(["user-msg"]));
    }

    #[test]
    fn test_retry_evaluation_shape() {
        let session = session();
        let body = serde_json::to_value(RetryEvaluation::new(&session, "again", "model-x")).unwrap();
        assert_eq!(body["modelId"], "model-x");
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["id"], "user-msg");
        assert_eq!(messages[0]["content"], "again");
        assert_eq!(messages[0]["evaluationSessionId"], "sess");
    }
}
