use super::ids::{JobId, UserId};
use super::money::Amount;
use crate::error::MarketError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a client submits when posting a job.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NewJob {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub budget: Amount,
    #[serde(default)]
    pub location: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub title: String,
    pub description: String,
    pub budget: Amount,
    pub location: String,
    pub client_id: UserId,
    /// Unset until a tasker accepts the job.
    pub tasker_id: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub completed: bool,
}

impl Job {
    pub fn post(client_id: UserId, new_job: NewJob) -> Result<Self, MarketError> {
        let title = new_job.title.trim();
        if title.is_empty() {
            return Err(MarketError::ValidationError(
                "job title must not be empty".to_string(),
            ));
        }
        Ok(Self {
            id: JobId::random(),
            title: title.to_string(),
            description: new_job.description.trim().to_string(),
            budget: new_job.budget,
            location: new_job.location.trim().to_string(),
            client_id,
            tasker_id: None,
            created_at: Utc::now(),
            completed: false,
        })
    }

    pub fn assign(&mut self, tasker_id: UserId) -> Result<(), MarketError> {
        if self.completed {
            return Err(MarketError::ValidationError(format!(
                "job {} is already completed",
                self.id
            )));
        }
        match self.tasker_id {
            Some(current) if current != tasker_id => Err(MarketError::ValidationError(format!(
                "job {} is already assigned to tasker {current}",
                self.id
            ))),
            _ => {
                self.tasker_id = Some(tasker_id);
                Ok(())
            }
        }
    }

    pub fn complete(&mut self) -> Result<(), MarketError> {
        if self.tasker_id.is_none() {
            return Err(MarketError::ValidationError(format!(
                "job {} has no tasker assigned yet",
                self.id
            )));
        }
        self.completed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn new_job(title: &str) -> NewJob {
        NewJob {
            title: title.to_string(),
            description: "Fix the kitchen sink".to_string(),
            budget: Amount::new(dec!(1500)).unwrap(),
            location: " Westlands ".to_string(),
        }
    }

    #[test]
    fn test_post_trims_and_defaults() {
        let job = Job::post(UserId::random(), new_job(" Plumbing ")).unwrap();
        assert_eq!(job.title, "Plumbing");
        assert_eq!(job.location, "Westlands");
        assert_eq!(job.tasker_id, None);
        assert!(!job.completed);
    }

    #[test]
    fn test_post_rejects_blank_title() {
        assert!(matches!(
            Job::post(UserId::random(), new_job("   ")),
            Err(MarketError::ValidationError(_))
        ));
    }

    #[test]
    fn test_assignment_lifecycle() {
        let mut job = Job::post(UserId::random(), new_job("Plumbing")).unwrap();
        assert!(job.complete().is_err());

        let tasker = UserId::random();
        job.assign(tasker).unwrap();
        job.assign(tasker).unwrap();
        assert!(job.assign(UserId::random()).is_err());

        job.complete().unwrap();
        assert!(job.completed);
        assert!(job.assign(tasker).is_err());
    }
}
