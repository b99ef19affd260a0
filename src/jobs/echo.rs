use async_trait::async_trait;

use crate::error::Result;
use crate::job::{Job, JobContext};

/// Writes its arguments to stdout, separated by spaces.
pub struct EchoJob {
    ctx: JobContext,
}

impl EchoJob {
    pub const NAME: &'static str = "echo";

    pub fn new(ctx: JobContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Job for EchoJob {
    fn context(&self) -> &JobContext {
        &self.ctx
    }

    fn context_mut(&mut self) -> &mut JobContext {
        &mut self.ctx
    }

    async fn main(&mut self, args: &[String]) -> Result<()> {
        self.ctx.println(&args.join(" "));
        Ok(())
    }
}
