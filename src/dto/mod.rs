pub mod calendar_dto;
pub mod pipeline_dto;
