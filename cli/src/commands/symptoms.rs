use clap::Subcommand;
use cropdoc_core::{CropId, SymptomId, SymptomRepository};

use crate::repository::HttpSymptomRepository;
use crate::util::{print_json, report_transport_error};

#[derive(Subcommand)]
pub enum SymptomCommands {
    /// List every symptom defined at a hierarchy level
    Level {
        /// Crop ID
        #[arg(long)]
        crop: i64,
        /// Hierarchy level (1 = coarsest)
        #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
        level: u32,
    },
    /// List the finer symptoms under a parent symptom
    Children {
        /// Crop ID
        #[arg(long)]
        crop: i64,
        /// Level of the children being requested
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        level: u32,
        /// Parent symptom ID
        #[arg(long)]
        parent: SymptomId,
    },
}

pub async fn run(repo: &HttpSymptomRepository, command: SymptomCommands) -> i32 {
    let result = match command {
        SymptomCommands::Level { crop, level } => repo.symptoms_at_level(CropId(crop), level).await,
        SymptomCommands::Children {
            crop,
            level,
            parent,
        } => repo.children_of(CropId(crop), level, &parent).await,
    };

    match result {
        Ok(symptoms) => print_json(&symptoms),
        Err(err) => report_transport_error(&err),
    }
}
