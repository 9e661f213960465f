//! Action node executor.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::info;
use waypoint_workflow::template::render_parameters;
use waypoint_workflow::{
    Node, NodeConfig, NodeExecutionError, NodeExecutor, NodeOutcome, WorkflowExecution,
};

/// Renders an action node's parameters against the execution and records
/// the dispatched action as the node's output.
///
/// The rendered action is also stored in the execution context under
/// `<node id>` so later nodes can refer to it as `context.<node id>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DispatchActionExecutor;

#[async_trait]
impl NodeExecutor for DispatchActionExecutor {
    async fn execute(
        &self,
        node: &Node,
        execution: &WorkflowExecution,
        now: DateTime<Utc>,
    ) -> Result<NodeOutcome, NodeExecutionError> {
        let NodeConfig::Action(config) = &node.config else {
            return Err(NodeExecutionError::InvalidConfig {
                message: format!("node '{}' is not an action", node.id),
            });
        };

        let parameters = render_parameters(&config.parameters, &execution.scope());
        let output = json!({
            "action": config.action,
            "parameters": parameters,
            "dispatched_at": now,
        });
        info!(node_id = %node.id, action = ?config.action, "dispatched action");

        Ok(NodeOutcome::success(output.clone()).with_context(node.id.as_str(), output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::Map;
    use waypoint_core::{OrganizationId, WorkflowId};
    use waypoint_workflow::{ActionKind, ActionNodeConfig};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 6, 9, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn renders_parameters_from_trigger_data() {
        let mut parameters = Map::new();
        parameters.insert(
            "message".to_string(),
            json!("Attendance for {{trigger.student_id}} dropped to {{trigger.value}}"),
        );
        let node = Node::new(
            "notify",
            NodeConfig::Action(ActionNodeConfig {
                action: ActionKind::SendNotification,
                parameters,
            }),
        );
        let execution = WorkflowExecution::new(
            WorkflowId::new(),
            OrganizationId::new(),
            json!({ "student_id": "s-42", "value": 0.62 }),
            now(),
        );

        let outcome = DispatchActionExecutor
            .execute(&node, &execution, now())
            .await
            .unwrap();

        let NodeOutcome::Success {
            output, context, ..
        } = outcome
        else {
            panic!("expected success");
        };
        assert_eq!(output["action"], "send_notification");
        assert_eq!(
            output["parameters"]["message"],
            "Attendance for s-42 dropped to 0.62"
        );
        assert_eq!(context["notify"], output);
    }

    #[tokio::test]
    async fn rejects_non_action_nodes() {
        let node = Node::delay("wait", 5);
        let execution =
            WorkflowExecution::new(WorkflowId::new(), OrganizationId::new(), json!({}), now());

        let err = DispatchActionExecutor
            .execute(&node, &execution, now())
            .await
            .unwrap_err();
        assert!(matches!(err, NodeExecutionError::InvalidConfig { .. }));
    }
}
