use actix_web::{
    get, post,
    web::{Data, Path, ServiceConfig, scope},
    HttpResponse,
};
use actix_web_validator::Json;
use uuid::Uuid;

use super::models::CreateJobRequest;
use super::service::{JobService, ServiceError};

#[post("")]
async fn create_job(
    service: Data<JobService>,
    body: Json<CreateJobRequest>,
) -> Result<HttpResponse, ServiceError> {
    let response = service.create_job(body.into_inner()).await?;
    Ok(HttpResponse::Created().json(response))
}

#[get("/{job_id}")]
async fn get_job(
    service: Data<JobService>,
    path: Path<Uuid>,
) -> Result<HttpResponse, ServiceError> {
    let progress = service.get_progress(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(progress))
}

#[post("/{job_id}/continue")]
async fn continue_job(
    service: Data<JobService>,
    path: Path<Uuid>,
) -> Result<HttpResponse, ServiceError> {
    let response = service.continue_job(path.into_inner()).await?;
    Ok(HttpResponse::Accepted().json(response))
}

#[post("/{job_id}/chunks/{index}/retry")]
async fn retry_chunk(
    service: Data<JobService>,
    path: Path<(Uuid, i32)>,
) -> Result<HttpResponse, ServiceError> {
    let (job_id, index) = path.into_inner();
    let response = service.retry_chunk(job_id, index).await?;
    Ok(HttpResponse::Accepted().json(response))
}

pub fn job_config(config: &mut ServiceConfig) {
    config.service(
        scope("/jobs")
            .service(create_job)
            .service(get_job)
            .service(continue_job)
            .service(retry_chunk),
    );
}
