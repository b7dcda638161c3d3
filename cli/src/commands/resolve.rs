use cropdoc_core::{CropId, SymptomId, SymptomRepository};

use crate::repository::HttpSymptomRepository;
use crate::util::{print_json, report_transport_error};

pub async fn run(repo: &HttpSymptomRepository, crop: i64, confirmed: &[SymptomId]) -> i32 {
    match repo.resolve(CropId(crop), confirmed).await {
        Ok(resolution) => print_json(&resolution),
        Err(err) => report_transport_error(&err),
    }
}
