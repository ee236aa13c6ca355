//! Interface external collaborators use to reach the command plane
//!
//! HTTP operation handlers and the AI tool executor only ever create
//! commands and wait for results; they depend on this trait rather than on
//! the concrete plane.

use crate::error::{ControlError, Result};
use crate::plane::CommandPlane;
use async_trait::async_trait;
use relay_types::{AckResult, ClusterId, Command, CommandId, CommandType, Fields};
use std::time::Duration;

#[async_trait]
pub trait CommandGateway: Send + Sync {
    /// Enqueue a new command for `cluster_id`
    fn create_command(
        &self,
        cluster_id: &ClusterId,
        command_type: CommandType,
        target: Fields,
        args: Fields,
        source: &str,
    ) -> Command;

    /// Wait for the ack of `command_id`; `None` once `timeout` elapses
    async fn await_result(
        &self,
        cluster_id: &ClusterId,
        command_id: &CommandId,
        timeout: Duration,
    ) -> Option<AckResult>;

    /// Create a command and wait for its result, reporting a missed
    /// deadline as [`ControlError::AgentTimeout`].
    ///
    /// The default registers the waiter after the enqueue, so an ack that
    /// lands in between is missed; implementations that can register both
    /// at once should override it.
    async fn execute(
        &self,
        cluster_id: &ClusterId,
        command_type: CommandType,
        target: Fields,
        args: Fields,
        source: &str,
        timeout: Duration,
    ) -> Result<AckResult> {
        let command = self.create_command(cluster_id, command_type, target, args, source);
        self.await_result(cluster_id, &command.id, timeout)
            .await
            .ok_or_else(|| ControlError::agent_timeout(cluster_id, &command.id))
    }
}

#[async_trait]
impl CommandGateway for CommandPlane {
    fn create_command(
        &self,
        cluster_id: &ClusterId,
        command_type: CommandType,
        target: Fields,
        args: Fields,
        source: &str,
    ) -> Command {
        CommandPlane::create_command(self, cluster_id, command_type, target, args, source)
    }

    async fn await_result(
        &self,
        cluster_id: &ClusterId,
        command_id: &CommandId,
        timeout: Duration,
    ) -> Option<AckResult> {
        CommandPlane::await_result(self, cluster_id, command_id, timeout).await
    }

    async fn execute(
        &self,
        cluster_id: &ClusterId,
        command_type: CommandType,
        target: Fields,
        args: Fields,
        source: &str,
        timeout: Duration,
    ) -> Result<AckResult> {
        let command = Command::new(cluster_id, command_type, target, args, source);
        let command_id = command.id.clone();
        let watch = self.enqueue_watched(cluster_id, command);
        self.await_watched(watch, timeout)
            .await
            .ok_or_else(|| ControlError::agent_timeout(cluster_id, &command_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    /// Stand-in for an HTTP handler that only knows the gateway
    async fn fetch_logs(
        gateway: Arc<dyn CommandGateway>,
        cluster_id: &ClusterId,
        pod: &str,
    ) -> Result<String> {
        let target = Fields::from([
            ("namespace".to_string(), "default".into()),
            ("name".to_string(), pod.into()),
        ]);
        let result = gateway
            .execute(
                cluster_id,
                CommandType::GetLogs,
                target,
                Fields::new(),
                "api",
                Duration::from_secs(2),
            )
            .await?;
        Ok(result.output.unwrap_or_default())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_handler_through_gateway() {
        let plane = Arc::new(CommandPlane::default());
        let cluster = ClusterId::new("east");

        let agent = {
            let plane = plane.clone();
            let cluster = cluster.clone();
            tokio::spawn(async move {
                let set = plane.poll(&cluster, 1, Duration::from_secs(2)).await;
                let results = set
                    .commands
                    .iter()
                    .map(|c| AckResult::succeeded(c.id.clone()).with_output("ready"))
                    .collect();
                plane.apply_ack(&cluster, results);
            })
        };

        let output = fetch_logs(plane.clone(), &cluster, "api-0").await.unwrap();
        agent.await.unwrap();
        assert_eq!(output, "ready");
    }

    #[tokio::test]
    async fn test_gateway_await_result_times_out() {
        let plane = CommandPlane::default();
        let gateway: &dyn CommandGateway = &plane;
        let cluster = ClusterId::new("east");

        let cmd = gateway.create_command(
            &cluster,
            CommandType::RestartPod,
            Fields::new(),
            Fields::new(),
            "ai-tool",
        );
        let result = gateway
            .await_result(&cluster, &cmd.id, Duration::from_millis(20))
            .await;
        assert!(result.is_none());
        assert!(plane.ensure_set(&cluster).contains(&cmd.id));
    }
}
