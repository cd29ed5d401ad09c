//! Scheduled and recurring push notifications.
//!
//! A [`NotificationScheduler`] manages delayed one-shot notifications and
//! periodic notification loops independently of any request. It only ever
//! addresses sessions by id through the server's push/broadcast primitives,
//! so a scheduled task never keeps a torn-down session alive.

use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::server::McpServer;
use crate::types::NotificationType;
use crate::Error;

/// Where a scheduled notification goes.
#[derive(Debug, Clone)]
pub enum NotificationTarget {
    /// One specific session; a vanished session makes delivery a no-op.
    Session(String),
    /// Every session active at fire time.
    Broadcast,
}

/// Notification message text: a fixed string or a producer resolved at each
/// fire.
#[derive(Clone)]
pub enum MessageContent {
    Literal(String),
    Producer(Arc<dyn Fn() -> BoxFuture<'static, Result<String, Error>> + Send + Sync>),
}

impl MessageContent {
    pub fn literal(message: &str) -> Self {
        MessageContent::Literal(message.to_string())
    }

    pub fn producer<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<String, Error>> + Send + 'static,
    {
        MessageContent::Producer(Arc::new(move || Box::pin(f())))
    }

    async fn resolve(&self) -> Result<String, Error> {
        match self {
            MessageContent::Literal(message) => Ok(message.clone()),
            MessageContent::Producer(producer) => producer().await,
        }
    }
}

/// Notification data payload: fixed or produced at each fire.
#[derive(Clone)]
pub enum DataContent {
    Literal(Option<Value>),
    Producer(Arc<dyn Fn() -> BoxFuture<'static, Result<Option<Value>, Error>> + Send + Sync>),
}

impl DataContent {
    pub fn none() -> Self {
        DataContent::Literal(None)
    }

    pub fn literal(data: Value) -> Self {
        DataContent::Literal(Some(data))
    }

    pub fn producer<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Option<Value>, Error>> + Send + 'static,
    {
        DataContent::Producer(Arc::new(move || Box::pin(f())))
    }

    async fn resolve(&self) -> Result<Option<Value>, Error> {
        match self {
            DataContent::Literal(data) => Ok(data.clone()),
            DataContent::Producer(producer) => producer().await,
        }
    }
}

type TaskMap = Arc<Mutex<HashMap<String, JoinHandle<()>>>>;

/// Schedules one-shot and periodic notifications through an [`McpServer`].
pub struct NotificationScheduler {
    server: Arc<McpServer>,
    scheduled_tasks: TaskMap,
    periodic_tasks: TaskMap,
}

impl NotificationScheduler {
    pub fn new(server: Arc<McpServer>) -> Self {
        Self {
            server,
            scheduled_tasks: Arc::new(Mutex::new(HashMap::new())),
            periodic_tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn deliver(
        server: &McpServer,
        target: &NotificationTarget,
        notification_type: NotificationType,
        message: &str,
        data: Option<Value>,
    ) {
        match target {
            NotificationTarget::Session(session_id) => {
                if let Err(e) = server
                    .push_notification(session_id, notification_type, message, data)
                    .await
                {
                    tracing::error!(session_id = %session_id, error = %e, "Notification delivery failed");
                }
            }
            NotificationTarget::Broadcast => {
                server
                    .broadcast_notification(notification_type, message, data)
                    .await;
            }
        }
    }

    /// Schedules a one-shot notification after `delay`. The task removes
    /// itself after firing. Returns the task id for cancellation.
    pub fn schedule_notification(
        &self,
        delay: Duration,
        notification_type: NotificationType,
        message: &str,
        data: Option<Value>,
        target: NotificationTarget,
    ) -> String {
        let task_id = format!("notification_{}", Uuid::new_v4());
        let server = self.server.clone();
        let tasks = self.scheduled_tasks.clone();
        let message = message.to_string();
        let id_in_task = task_id.clone();

        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            Self::deliver(&server, &target, notification_type, &message, data).await;
            tasks
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&id_in_task);
        });

        self.scheduled_tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(task_id.clone(), task);
        tracing::info!(task_id = %task_id, ?delay, "Scheduled notification");
        task_id
    }

    /// Cancels a scheduled notification before it fires. Returns whether a
    /// task with that id was found; an unknown id is not an error.
    pub fn cancel_scheduled_notification(&self, task_id: &str) -> bool {
        let removed = self
            .scheduled_tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(task_id);
        match removed {
            Some(task) => {
                task.abort();
                tracing::info!(task_id = %task_id, "Cancelled scheduled notification");
                true
            }
            None => false,
        }
    }

    /// Starts a periodic notification loop. Message and data content are
    /// resolved at each fire; a producer error is logged and the loop keeps
    /// running. Runs until [`stop_periodic_notification`](Self::stop_periodic_notification)
    /// or [`stop_all_notifications`](Self::stop_all_notifications).
    pub fn start_periodic_notification(
        &self,
        interval: Duration,
        notification_type: NotificationType,
        message: MessageContent,
        data: DataContent,
        target: NotificationTarget,
    ) -> String {
        let task_id = format!("periodic_{}", Uuid::new_v4());
        let server = self.server.clone();
        let id_in_task = task_id.clone();

        let task = tokio::spawn(async move {
            loop {
                match (message.resolve().await, data.resolve().await) {
                    (Ok(message), Ok(data)) => {
                        Self::deliver(&server, &target, notification_type, &message, data).await;
                    }
                    (Err(e), _) | (_, Err(e)) => {
                        tracing::error!(task_id = %id_in_task, error = %e, "Error in periodic notification");
                    }
                }
                tokio::time::sleep(interval).await;
            }
        });

        self.periodic_tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(task_id.clone(), task);
        tracing::info!(task_id = %task_id, ?interval, "Started periodic notification");
        task_id
    }

    /// Stops a periodic notification loop. Returns whether a task with that
    /// id was found.
    pub fn stop_periodic_notification(&self, task_id: &str) -> bool {
        let removed = self
            .periodic_tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(task_id);
        match removed {
            Some(task) => {
                task.abort();
                tracing::info!(task_id = %task_id, "Stopped periodic notification");
                true
            }
            None => false,
        }
    }

    /// Stops every scheduled and periodic notification.
    pub fn stop_all_notifications(&self) {
        let scheduled: Vec<String> = self
            .scheduled_tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        for task_id in scheduled {
            self.cancel_scheduled_notification(&task_id);
        }

        let periodic: Vec<String> = self
            .periodic_tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        for task_id in periodic {
            self.stop_periodic_notification(&task_id);
        }
        tracing::info!("Stopped all notifications");
    }
}

impl Drop for NotificationScheduler {
    fn drop(&mut self) {
        self.stop_all_notifications();
    }
}
