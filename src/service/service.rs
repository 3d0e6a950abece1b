use std::{any::Any, sync::Arc};

use async_trait::async_trait;
use luge_core::{Result, Server, utils::string::SplitInfallible};
use luge_database::Database;

use crate::services::Sources;

/// Abstract interface for an engine-owned service.
#[async_trait]
pub(crate) trait Service: Any + Send + Sync {
	/// Construct the service instance. Services are singletons; expect this
	/// to be called once per process.
	fn build(args: Args<'_>) -> Result<Arc<impl Service>>
	where
		Self: Sized;

	/// The service's worker loop. The manager spawns a task and calls this
	/// after all services have been built; the worker returns when shutdown
	/// is signalled.
	async fn worker(self: Arc<Self>) -> Result { Ok(()) }

	/// Initiate a graceful shutdown of the worker.
	async fn interrupt(&self) {}

	/// Name of the service, i.e.
	/// `crate::service::make_name(std::module_path!())`.
	fn name(&self) -> &str;
}

/// Args are passed to `Service::build` when a service is constructed,
/// carrying the shared handles and the external collaborators.
pub(crate) struct Args<'a> {
	pub(crate) server: &'a Arc<Server>,
	pub(crate) db: &'a Arc<Database>,
	pub(crate) sources: &'a Sources,
}

/// Utility for service implementations; see Service::name() in the trait.
#[inline]
pub(crate) fn make_name(module_path: &str) -> &str { module_path.split_once_infallible("::").1 }
