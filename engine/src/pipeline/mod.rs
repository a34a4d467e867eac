//! Travel Pipeline
//!
//! The declared task graph for one travel request, plus the capability
//! handlers behind each task name. The graph is configuration consumed by
//! the workflow engine:
//!
//! ```text
//! flight_search
//!   -> parallel { hotel_search, weather_search, events_search }
//!   -> synthesize_results
//!   -> deliver_itinerary
//! ```
//!
//! with every stage catching into `handle_error`, which persists the
//! terminal FAILED status.

use sdk::types::IntentFields;
use std::sync::Arc;

use crate::config::{LlmConfig, ResearchConfig};
use crate::llm::TextGenerator;
use crate::store::RequestRepository;
use crate::workflow::{
    ExecutionContext, Node, ParallelNode, TaskError, TaskNode, TaskRegistry, Workflow,
};

pub mod delivery;
pub mod error_handler;
pub mod events;
pub mod flight;
pub mod hotel;
pub mod synthesis;
pub mod weather;

/// Context keys seeded by the service before an execution starts
pub const INTENT_KEY: &str = "intent";
pub const FINGERPRINT_KEY: &str = "fingerprint";
pub const CORRELATION_KEY: &str = "correlation_id";

/// Task names, doubling as registry keys
pub const TASK_FLIGHT: &str = "flight_search";
pub const TASK_HOTEL: &str = "hotel_search";
pub const TASK_WEATHER: &str = "weather_search";
pub const TASK_EVENTS: &str = "events_search";
pub const TASK_SYNTHESIS: &str = "synthesize_results";
pub const TASK_DELIVERY: &str = "deliver_itinerary";
pub const TASK_ERROR_HANDLER: &str = "handle_error";

/// Output keys written by the pipeline stages
pub const FLIGHT_OUTPUT_KEY: &str = "flight_output";
pub const PARALLEL_OUTPUT_KEY: &str = "parallel_results";
pub const SYNTHESIS_OUTPUT_KEY: &str = "synthesis_output";

/// The declared travel workflow
///
/// Parallel slot order is hotel, weather, events — downstream stages index
/// the aggregate by that declared order.
pub fn travel_workflow() -> Workflow {
    Workflow::new(
        "travel_itinerary",
        vec![
            Node::Task(TaskNode::new(TASK_FLIGHT, FLIGHT_OUTPUT_KEY).with_catch(TASK_ERROR_HANDLER)),
            Node::Parallel(
                ParallelNode::new(
                    "research_updates",
                    PARALLEL_OUTPUT_KEY,
                    vec![
                        vec![Node::Task(TaskNode::new(TASK_HOTEL, "hotel_output"))],
                        vec![Node::Task(TaskNode::new(TASK_WEATHER, "weather_output"))],
                        vec![Node::Task(TaskNode::new(TASK_EVENTS, "events_output"))],
                    ],
                )
                .with_catch(TASK_ERROR_HANDLER),
            ),
            Node::Task(
                TaskNode::new(TASK_SYNTHESIS, SYNTHESIS_OUTPUT_KEY).with_catch(TASK_ERROR_HANDLER),
            ),
            Node::Task(
                TaskNode::new(TASK_DELIVERY, "delivery_output").with_catch(TASK_ERROR_HANDLER),
            ),
        ],
    )
}

/// Dependencies injected into the pipeline handlers at construction
pub struct PipelineDeps {
    pub http: reqwest::Client,
    pub backend: Arc<dyn TextGenerator>,
    pub requests: Arc<RequestRepository>,
    pub research: ResearchConfig,
    pub llm: LlmConfig,
}

/// Wire every pipeline task into a registry
pub fn build_registry(deps: &PipelineDeps) -> TaskRegistry {
    let mut registry = TaskRegistry::new();

    registry.register(
        TASK_FLIGHT,
        Arc::new(flight::FlightSearchTask::new(
            deps.http.clone(),
            deps.research.flight.clone(),
        )),
    );
    registry.register(
        TASK_HOTEL,
        Arc::new(hotel::HotelSearchTask::new(
            deps.http.clone(),
            deps.research.places.clone(),
        )),
    );
    registry.register(
        TASK_WEATHER,
        Arc::new(weather::WeatherForecastTask::new(
            deps.http.clone(),
            deps.research.weather.clone(),
        )),
    );
    registry.register(
        TASK_EVENTS,
        Arc::new(events::EventsSearchTask::new(
            deps.http.clone(),
            deps.research.places.clone(),
        )),
    );
    registry.register(
        TASK_SYNTHESIS,
        Arc::new(synthesis::SynthesisTask::new(
            Arc::clone(&deps.backend),
            deps.llm.clone(),
        )),
    );
    registry.register(
        TASK_DELIVERY,
        Arc::new(delivery::DeliveryTask::new(Arc::clone(&deps.requests))),
    );
    registry.register(
        TASK_ERROR_HANDLER,
        Arc::new(error_handler::ErrorHandlerTask::new(Arc::clone(
            &deps.requests,
        ))),
    );

    registry
}

/// Read the seeded intent fields out of the context
pub(crate) fn read_intent(ctx: &ExecutionContext) -> Result<IntentFields, TaskError> {
    ctx.get_as::<IntentFields>(INTENT_KEY)
        .ok_or_else(|| TaskError::MissingInput(INTENT_KEY.to_string()))
}

/// Read a required string value out of the context
pub(crate) fn require_str(ctx: &ExecutionContext, key: &str) -> Result<String, TaskError> {
    ctx.get(key)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| TaskError::MissingInput(key.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workflow_shape_matches_declared_pipeline() {
        let workflow = travel_workflow();
        assert_eq!(workflow.nodes.len(), 4);

        let names: Vec<&str> = workflow.nodes.iter().map(|n| n.name()).collect();
        assert_eq!(
            names,
            vec![
                TASK_FLIGHT,
                "research_updates",
                TASK_SYNTHESIS,
                TASK_DELIVERY
            ]
        );

        // Every stage catches into the error handler
        for node in &workflow.nodes {
            assert_eq!(node.catch(), Some(TASK_ERROR_HANDLER));
        }

        // Declared branch order: hotel, weather, events
        let Node::Parallel(block) = &workflow.nodes[1] else {
            panic!("second node should be the parallel block");
        };
        let branch_names: Vec<&str> = block
            .branches
            .iter()
            .map(|b| b.first().map(|n| n.name()).unwrap_or_default())
            .collect();
        assert_eq!(branch_names, vec![TASK_HOTEL, TASK_WEATHER, TASK_EVENTS]);
    }
}
