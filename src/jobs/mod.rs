//! Jobs shipped with the resource.

mod copy;
mod echo;

pub use copy::CopyJob;
pub use echo::EchoJob;

use crate::job::JobRegistry;

pub fn register_builtins(registry: &mut JobRegistry) {
    registry.register(CopyJob::NAME, |ctx| Box::new(CopyJob::new(ctx)));
    registry.register(EchoJob::NAME, |ctx| Box::new(EchoJob::new(ctx)));
}
