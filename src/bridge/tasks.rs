use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::host::{HostError, Item, ItemKind, Variant};
use crate::models::{NewTask, OperationResult, TaskChanges, TaskStatus, TaskSummary};

use super::{
    mutation, put_all, required_bool, required_text, Bridge, BridgeError, Entity, ItemOutcome,
    SafeAccessor, SkipReason,
};

/// Due dates are stored at noon so that time-zone shifts keep the day.
fn due_at_noon(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::from_hms_opt(12, 0, 0).unwrap_or_default())
}

fn check_importance(importance: i64) -> Result<(), BridgeError> {
    if (0..=2).contains(&importance) {
        Ok(())
    } else {
        Err(BridgeError::validation(
            "importance",
            format!("{} is not 0 (low), 1 (normal) or 2 (high)", importance),
        ))
    }
}

impl Bridge {
    /// Tasks in the default task folder, incomplete ones only unless
    /// `include_completed` is set.
    pub fn list_tasks(&self, include_completed: bool) -> Result<Vec<TaskSummary>, BridgeError> {
        let items = self.tasks()?.items()?;
        let outcomes: Vec<ItemOutcome<TaskSummary>> = items
            .iter()
            .map(|item| match item.and_then(|item| task_summary(item.as_ref())) {
                Ok(task) if task.complete && !include_completed => {
                    ItemOutcome::Skipped(SkipReason::Excluded)
                }
                result => result.into(),
            })
            .collect();
        Ok(outcomes
            .into_iter()
            .filter_map(|outcome| match outcome {
                ItemOutcome::Skipped(SkipReason::Failed(e)) => {
                    tracing::debug!(error = %e, "Skipping task item");
                    None
                }
                other => other.projected(),
            })
            .collect())
    }

    pub fn list_all_tasks(&self) -> Result<Vec<TaskSummary>, BridgeError> {
        self.list_tasks(true)
    }

    pub fn get_task(&self, entry_id: &str) -> Result<TaskSummary, BridgeError> {
        let item = self.require(Entity::Task, entry_id)?;
        task_summary(item.as_ref()).map_err(|e| {
            tracing::debug!(entry_id, error = %e, "Task failed to project");
            BridgeError::not_found(Entity::Task, entry_id)
        })
    }

    pub fn create_task(&self, task: NewTask) -> Result<OperationResult, BridgeError> {
        check_importance(task.importance)?;
        let mut item = self.application().create_item(ItemKind::Task)?;
        let mut values: Vec<(&str, Variant)> = vec![
            ("Subject", task.subject.into()),
            ("Body", task.body.into()),
        ];
        if let Some(due) = task.due_date {
            values.push(("DueDate", due_at_noon(due).into()));
        }
        values.push(("Importance", task.importance.into()));
        match put_all(item.as_mut(), values).and_then(|()| item.save()) {
            Ok(()) => {
                let entry_id = SafeAccessor::new(item.as_ref()).text("EntryID", "");
                tracing::info!(entry_id = %entry_id, "Created task");
                Ok(OperationResult::created(entry_id, "Task created"))
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to create task");
                Ok(OperationResult::failed(e.to_string()))
            }
        }
    }

    /// Apply `changes`. A new completion percentage also moves the status;
    /// an explicit `complete` flag wins over both.
    pub fn edit_task(&self, entry_id: &str, changes: TaskChanges) -> Result<OperationResult, BridgeError> {
        if let Some(importance) = changes.importance {
            check_importance(importance)?;
        }
        if let Some(percent) = changes.percent_complete {
            if !(0..=100).contains(&percent) {
                return Err(BridgeError::validation(
                    "percent_complete",
                    format!("{} is not between 0 and 100", percent),
                ));
            }
        }

        let mut item = self.require(Entity::Task, entry_id)?;
        let mut values: Vec<(&str, Variant)> = Vec::new();
        if let Some(subject) = changes.subject.filter(|s| !s.is_empty()) {
            values.push(("Subject", subject.into()));
        }
        if let Some(body) = changes.body {
            values.push(("Body", body.into()));
        }
        if let Some(due) = changes.due_date {
            values.push(("DueDate", due_at_noon(due).into()));
        }
        if let Some(importance) = changes.importance {
            values.push(("Importance", importance.into()));
        }
        if let Some(percent) = changes.percent_complete {
            let status = TaskStatus::for_percent(percent);
            values.push(("PercentComplete", percent.into()));
            values.push(("Status", status.code().into()));
            if status == TaskStatus::Complete {
                values.push(("Complete", true.into()));
            }
        }
        if let Some(complete) = changes.complete {
            let (percent, status) = if complete {
                (100, TaskStatus::Complete)
            } else {
                (0, TaskStatus::NotStarted)
            };
            values.push(("Complete", complete.into()));
            values.push(("PercentComplete", Variant::Int(percent)));
            values.push(("Status", status.code().into()));
        }
        let result = put_all(item.as_mut(), values).and_then(|()| item.save());
        mutation(Entity::Task, entry_id, result, "Task updated")
    }

    pub fn complete_task(&self, entry_id: &str) -> Result<OperationResult, BridgeError> {
        let mut item = self.require(Entity::Task, entry_id)?;
        let values = vec![
            ("Complete", Variant::Bool(true)),
            ("PercentComplete", Variant::Int(100)),
            ("Status", Variant::Int(TaskStatus::Complete.code())),
        ];
        let result = put_all(item.as_mut(), values).and_then(|()| item.save());
        mutation(Entity::Task, entry_id, result, "Task completed")
    }

    pub fn delete_task(&self, entry_id: &str) -> Result<OperationResult, BridgeError> {
        self.delete_item(Entity::Task, entry_id)
    }
}

fn task_summary(item: &dyn Item) -> Result<TaskSummary, HostError> {
    let access = SafeAccessor::new(item);
    Ok(TaskSummary {
        entry_id: required_text(item, "EntryID")?,
        subject: access.text("Subject", "(No Subject)"),
        body: access.text("Body", ""),
        due_date: access.optional_date("DueDate").map(|due| due.date()),
        status: access.optional_int("Status"),
        priority: access.optional_int("Importance"),
        complete: required_bool(item, "Complete")?,
        percent_complete: access.int("PercentComplete", 0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn due_dates_land_at_noon() {
        let date = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        assert_eq!(due_at_noon(date).to_string(), "2025-01-01 12:00:00");
    }

    #[test]
    fn importance_outside_range_is_rejected() {
        assert!(check_importance(0).is_ok());
        assert!(check_importance(2).is_ok());
        assert!(matches!(
            check_importance(3),
            Err(BridgeError::Validation { field, .. }) if field == "importance"
        ));
    }
}
