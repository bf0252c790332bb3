//! Job scheduling order.

use indexmap::IndexMap;

use super::job::Job;
use crate::config::ExecutionOrder;
use crate::error::ConfigError;

/// Returns job names in the order `order` runs them.
pub(crate) fn job_order<'a>(
    jobs: &'a IndexMap<String, Job>,
    order: ExecutionOrder,
) -> Result<Vec<&'a str>, ConfigError> {
    match order {
        ExecutionOrder::Declaration => Ok(jobs.keys().map(String::as_str).collect()),
        ExecutionOrder::Dependency => topological(jobs),
    }
}

/// Repeatedly takes the first pending job, in declaration order, whose needs
/// have all been scheduled. A job unblocked by the one just taken can run
/// before a job declared after it that was ready earlier.
fn topological(jobs: &IndexMap<String, Job>) -> Result<Vec<&str>, ConfigError> {
    for (name, job) in jobs {
        if let Some(unknown) = job.needs.iter().find(|need| !jobs.contains_key(*need)) {
            return Err(ConfigError::UnknownDependency {
                job: name.clone(),
                needs: unknown.clone(),
            });
        }
    }

    let mut pending: Vec<&str> = jobs.keys().map(String::as_str).collect();
    let mut ordered = Vec::with_capacity(pending.len());

    while !pending.is_empty() {
        let ready = pending.iter().position(|name| {
            jobs[*name]
                .needs
                .iter()
                .all(|need| ordered.contains(&need.as_str()))
        });

        match ready {
            Some(index) => ordered.push(pending.remove(index)),
            None => return Err(ConfigError::CyclicDependency(pending.join(", "))),
        }
    }

    Ok(ordered)
}
