#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]
pub mod basis;
pub mod config;
pub mod correlation;
pub mod data;
pub mod design;
pub mod enumerate;
pub mod estimate;
pub mod family;
pub mod pipeline;
pub mod pirls;
pub mod predict;
pub mod rank;
pub mod report;
pub mod terms;

pub use config::SelectionConfig;
pub use data::{SurveyData, load_survey_data};
pub use pipeline::{SelectionError, SelectionReport, run_selection, write_outputs};
