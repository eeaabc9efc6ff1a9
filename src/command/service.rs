//! Command service wiring the dispatcher to its collaborators

use super::register::CorrelationRegister;
use super::response::ResponseHandler;
use crate::config::DispatchConfig;
use crate::marshal::Marshaller;
use crate::metadata::MetadataRepository;
use crate::timeseries::TimeSeries;
use crate::transport::CommandProducer;
use std::sync::Arc;

/// Entry point for device, group and batch commands
///
/// Cheap to clone; every clone shares the same register and collaborators.
#[derive(Clone)]
pub struct CommandService {
    pub(crate) config: Arc<DispatchConfig>,
    pub(crate) repository: Arc<dyn MetadataRepository>,
    pub(crate) marshaller: Arc<dyn Marshaller>,
    pub(crate) timeseries: Arc<dyn TimeSeries>,
    pub(crate) producer: Arc<dyn CommandProducer>,
    pub(crate) register: Arc<CorrelationRegister>,
}

impl CommandService {
    pub fn new(
        config: DispatchConfig,
        repository: Arc<dyn MetadataRepository>,
        marshaller: Arc<dyn Marshaller>,
        timeseries: Arc<dyn TimeSeries>,
        producer: Arc<dyn CommandProducer>,
        register: Arc<CorrelationRegister>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            repository,
            marshaller,
            timeseries,
            producer,
            register,
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn register(&self) -> &Arc<CorrelationRegister> {
        &self.register
    }

    /// Callbacks the transport invokes for responses and errors
    pub fn response_handler(&self) -> ResponseHandler {
        ResponseHandler::new(self.register.clone(), self.marshaller.clone())
    }
}
