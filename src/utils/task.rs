use tokio::task::{AbortHandle, JoinHandle};

/// Aborts a spawned task when dropped, so the task owning the guard cannot
/// be torn down while leaving its helper running.
pub(crate) struct AbortOnDrop(AbortHandle);

impl AbortOnDrop {
    pub(crate) fn for_task<T>(task: &JoinHandle<T>) -> Self {
        Self(task.abort_handle())
    }
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dropping_the_guard_aborts_the_task() {
        let task = tokio::spawn(std::future::pending::<()>());
        drop(AbortOnDrop::for_task(&task));
        assert!(task.await.expect_err("aborted").is_cancelled());
    }
}
