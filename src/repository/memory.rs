use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::time::Duration;

use crate::constants::TaskStatus;
use crate::error::{AnalysisError, Result};
use crate::models::{AnalysisResult, AnalysisTask};

use super::{ResultRepository, TaskRepository};

fn reject_terminal(current: &AnalysisTask, next: TaskStatus) -> Result<()> {
    if current.is_terminal() && current.status != next {
        return Err(AnalysisError::InvalidArgument(format!(
            "task {} is {} and cannot become {next}",
            current.id, current.status
        )));
    }
    Ok(())
}

#[derive(Debug, Default)]
pub struct InMemoryTaskRepository {
    tasks: DashMap<String, AnalysisTask>,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn create(&self, task: &AnalysisTask) -> Result<()> {
        match self.tasks.entry(task.id.clone()) {
            Entry::Occupied(_) => Err(AnalysisError::InvalidTask(format!(
                "task {} already exists",
                task.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(task.clone());
                Ok(())
            }
        }
    }

    async fn update(&self, task: &AnalysisTask) -> Result<()> {
        let mut stored = self
            .tasks
            .get_mut(&task.id)
            .ok_or_else(|| AnalysisError::not_found("task", &task.id))?;
        reject_terminal(&stored, task.status)?;
        *stored = task.clone();
        Ok(())
    }

    async fn get_by_id(&self, task_id: &str) -> Result<AnalysisTask> {
        self.tasks
            .get(task_id)
            .map(|task| task.clone())
            .ok_or_else(|| AnalysisError::not_found("task", task_id))
    }

    async fn update_status(&self, task_id: &str, status: TaskStatus) -> Result<()> {
        let mut stored = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| AnalysisError::not_found("task", task_id))?;
        reject_terminal(&stored, status)?;
        let now = Utc::now();
        stored.status = status;
        stored.updated_at = now;
        if status.is_terminal() && stored.completed_at.is_none() {
            stored.completed_at = Some(now);
        }
        Ok(())
    }

    async fn get_expired_tasks(&self, grace: Duration) -> Result<Vec<AnalysisTask>> {
        let grace = chrono::Duration::from_std(grace)
            .map_err(|e| AnalysisError::InvalidArgument(format!("grace period out of range: {e}")))?;
        let now = Utc::now();
        Ok(self
            .tasks
            .iter()
            .filter(|task| task.status == TaskStatus::Processing)
            .filter(|task| task.deadline().is_some_and(|deadline| deadline + grace < now))
            .map(|task| task.clone())
            .collect())
    }

    async fn get_stale_pending_tasks(&self, grace: Duration) -> Result<Vec<AnalysisTask>> {
        let grace = chrono::Duration::from_std(grace)
            .map_err(|e| AnalysisError::InvalidArgument(format!("grace period out of range: {e}")))?;
        let cutoff = Utc::now() - grace;
        Ok(self
            .tasks
            .iter()
            .filter(|task| task.status == TaskStatus::Pending && task.updated_at <= cutoff)
            .map(|task| task.clone())
            .collect())
    }

    async fn count_by_status(&self) -> Result<HashMap<TaskStatus, u64>> {
        let mut counts = HashMap::new();
        for task in self.tasks.iter() {
            *counts.entry(task.status).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

/// Keeps the latest result per task
#[derive(Debug, Default)]
pub struct InMemoryResultRepository {
    results: DashMap<String, AnalysisResult>,
}

impl InMemoryResultRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResultRepository for InMemoryResultRepository {
    async fn create(&self, result: &AnalysisResult) -> Result<()> {
        self.results.insert(result.task_id.clone(), result.clone());
        Ok(())
    }

    async fn get_by_task_id(&self, task_id: &str) -> Result<AnalysisResult> {
        self.results
            .get(task_id)
            .map(|result| result.clone())
            .ok_or_else(|| AnalysisError::not_found("result", task_id))
    }

    async fn get_by_alert_id(&self, alert_id: &str) -> Result<Vec<AnalysisResult>> {
        let mut results: Vec<AnalysisResult> = self
            .results
            .iter()
            .filter(|result| result.alert_id == alert_id)
            .map(|result| result.clone())
            .collect();
        results.sort_by_key(|result| result.created_at);
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::AnalysisType;

    #[tokio::test]
    async fn test_task_crud() {
        let repo = InMemoryTaskRepository::new();
        let task = AnalysisTask::new("t1", "a1", AnalysisType::RootCause);
        repo.create(&task).await.unwrap();
        assert!(repo.create(&task).await.is_err());

        repo.update_status("t1", TaskStatus::Processing).await.unwrap();
        assert_eq!(repo.get_by_id("t1").await.unwrap().status, TaskStatus::Processing);
        assert!(repo.get_by_id("t2").await.unwrap_err().is_not_found());
        assert!(repo
            .update_status("t2", TaskStatus::Failed)
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_terminal_tasks_reject_writes() {
        let repo = InMemoryTaskRepository::new();
        let task = AnalysisTask::new("t1", "a1", AnalysisType::RootCause);
        repo.create(&task).await.unwrap();
        repo.update_status("t1", TaskStatus::Cancelled).await.unwrap();

        assert!(repo.update_status("t1", TaskStatus::Completed).await.is_err());
        // re-asserting the same terminal status is idempotent
        assert!(repo.update_status("t1", TaskStatus::Cancelled).await.is_ok());

        let mut stale = task.clone();
        stale.status = TaskStatus::Processing;
        assert!(repo.update(&stale).await.is_err());
        assert_eq!(repo.get_by_id("t1").await.unwrap().status, TaskStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_expired_tasks() {
        let repo = InMemoryTaskRepository::new();
        let mut overdue = AnalysisTask::new("overdue", "a", AnalysisType::RootCause)
            .with_timeout(Duration::from_millis(10));
        overdue.mark_processing().unwrap();
        overdue.started_at = Some(Utc::now() - chrono::Duration::seconds(5));
        repo.create(&overdue).await.unwrap();

        let mut running = AnalysisTask::new("running", "a", AnalysisType::RootCause)
            .with_timeout(Duration::from_secs(60));
        running.mark_processing().unwrap();
        repo.create(&running).await.unwrap();

        repo.create(&AnalysisTask::new("pending", "a", AnalysisType::RootCause))
            .await
            .unwrap();

        let expired = repo.get_expired_tasks(Duration::from_secs(1)).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, "overdue");

        assert!(repo
            .get_expired_tasks(Duration::from_secs(30))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_stale_pending_tasks() {
        let repo = InMemoryTaskRepository::new();
        let mut stale = AnalysisTask::new("stale", "x", AnalysisType::RootCause);
        stale.updated_at = Utc::now() - chrono::Duration::seconds(120);
        repo.create(&stale).await.unwrap();
        repo.create(&AnalysisTask::new("fresh", "x", AnalysisType::RootCause))
            .await
            .unwrap();
        let mut claimed = AnalysisTask::new("claimed", "x", AnalysisType::RootCause);
        claimed.updated_at = Utc::now() - chrono::Duration::seconds(120);
        claimed.status = TaskStatus::Processing;
        repo.create(&claimed).await.unwrap();

        let found = repo
            .get_stale_pending_tasks(Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "stale");
        assert_eq!(
            repo.get_stale_pending_tasks(Duration::ZERO).await.unwrap().len(),
            2
        );
    }

    #[tokio::test]
    async fn test_count_by_status() {
        let repo = InMemoryTaskRepository::new();
        for id in ["a", "b", "c"] {
            repo.create(&AnalysisTask::new(id, "x", AnalysisType::RootCause))
                .await
                .unwrap();
        }
        repo.update_status("c", TaskStatus::Failed).await.unwrap();
        let counts = repo.count_by_status().await.unwrap();
        assert_eq!(counts[&TaskStatus::Pending], 2);
        assert_eq!(counts[&TaskStatus::Failed], 1);
        assert!(!counts.contains_key(&TaskStatus::Completed));
    }

    #[tokio::test]
    async fn test_results_by_task_and_alert() {
        let repo = InMemoryResultRepository::new();
        let t1 = AnalysisTask::new("t1", "alert-1", AnalysisType::RootCause);
        let t2 = AnalysisTask::new("t2", "alert-1", AnalysisType::ImpactAssessment);
        let t3 = AnalysisTask::new("t3", "alert-2", AnalysisType::RootCause);
        for task in [&t1, &t2, &t3] {
            repo.create(&AnalysisResult::for_task(task)).await.unwrap();
        }

        assert_eq!(repo.get_by_task_id("t2").await.unwrap().task_id, "t2");
        assert!(repo.get_by_task_id("t9").await.unwrap_err().is_not_found());
        assert_eq!(repo.get_by_alert_id("alert-1").await.unwrap().len(), 2);
        assert!(repo.get_by_alert_id("alert-9").await.unwrap().is_empty());
    }
}
