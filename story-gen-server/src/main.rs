use std::convert::Infallible;
use std::io;
use std::path::{Path, PathBuf};

use actix_cors::Cors;
use actix_web::middleware::Logger;
use actix_web::web::Bytes;
use actix_web::{App, HttpResponse, HttpServer, Responder, get, post, rt, web};
use clap::Parser;
use env_logger::Env;
use futures::channel::mpsc::{self, UnboundedSender};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use story_gen_core::model::GenerationConfig;
use story_gen_core::{ModelError, TokenId, TokenizerArtifact, TrigramArtifact, check_compatible};

/// Command line / environment configuration of the service.
#[derive(Parser, Debug)]
#[command(name = "story-gen-server", version, about = "Serves story generation over HTTP")]
struct Args {
	#[arg(long, env = "STORY_GEN_HOST", default_value = "127.0.0.1")]
	host: String,

	#[arg(long, env = "STORY_GEN_PORT", default_value_t = 5000)]
	port: u16,

	/// Trained tokenizer artifact.
	#[arg(long, env = "STORY_GEN_TOKENIZER", default_value = "models/tokenizer.bin")]
	tokenizer: PathBuf,

	/// Trained trigram artifact.
	#[arg(long, env = "STORY_GEN_MODEL", default_value = "models/trigram.bin")]
	model: PathBuf,
}

/// Parameters of `/v1/generate` (JSON body) and `/v1/generate/stream` (query string).
#[derive(Deserialize)]
struct GenerateParams {
	#[serde(default)]
	prefix: String,
	max_length: Option<i64>,
	temperature: Option<f64>,
	seed: Option<u64>,
	greedy: Option<bool>,
}

impl GenerateParams {
	/// Negative lengths are clamped to 0, which yields an empty continuation.
	fn config(&self) -> GenerationConfig {
		let defaults = GenerationConfig::default();
		GenerationConfig {
			max_length: self.max_length.map_or(defaults.max_length, |n| n.max(0) as usize),
			temperature: self.temperature.unwrap_or(defaults.temperature),
			greedy: self.greedy.unwrap_or(defaults.greedy),
			seed: self.seed,
		}
	}
}

#[derive(Serialize)]
struct GenerateResponse {
	/// Prefix and continuation rendered together.
	story: String,
	continuation: String,
	tokens_generated: usize,
}

/// Artifacts shared by every worker. Read-only, so no lock.
struct AppState {
	tokenizer: TokenizerArtifact,
	model: TrigramArtifact,
}

type EventSender = UnboundedSender<Result<Bytes, Infallible>>;

impl AppState {
	fn load(tokenizer: &Path, model: &Path) -> Result<Self, ModelError> {
		let tokenizer = TokenizerArtifact::load(tokenizer)?;
		let model = TrigramArtifact::load(model)?;
		check_compatible(&tokenizer, &model)?;
		Ok(Self { tokenizer, model })
	}

	fn generate(&self, prefix: &str, config: &GenerationConfig) -> Result<GenerateResponse, ModelError> {
		let prefix = self.tokenizer.encode(prefix);
		let continuation: Vec<TokenId> = self.model.generation(&prefix, config, config.rng())?.collect();
		let story: Vec<TokenId> = prefix.iter().chain(&continuation).copied().collect();

		Ok(GenerateResponse {
			story: self.tokenizer.decode_display(&story),
			continuation: self.tokenizer.decode_display(&continuation),
			tokens_generated: continuation.len(),
		})
	}

	/// Sends one event per sampled token, then a `done` event.
	/// Stops early when the client goes away.
	fn stream(&self, prefix: &str, config: &GenerationConfig, tx: &EventSender) {
		let prefix = self.tokenizer.encode(prefix);
		let generation = match self.model.generation(&prefix, config, config.rng()) {
			Ok(generation) => generation,
			Err(e) => {
				let _ = tx.unbounded_send(Ok(sse_frame(Some("error"), &json!({ "detail": e.to_string() }))));
				return;
			}
		};

		let mut ids: Vec<TokenId> = Vec::new();
		for id in generation {
			ids.push(id);
			let text = self.tokenizer.decode_display(&ids);
			if tx.unbounded_send(Ok(sse_frame(None, &json!({ "token": id, "text": text })))).is_err() {
				debug!("stream closed by client after {} tokens", ids.len());
				return;
			}
		}

		let done = json!({
			"done": true,
			"continuation": self.tokenizer.decode_display(&ids),
			"tokens_generated": ids.len(),
		});
		let _ = tx.unbounded_send(Ok(sse_frame(Some("done"), &done)));
	}
}

/// One Server-Sent Events frame.
fn sse_frame(event: Option<&str>, payload: &Value) -> Bytes {
	let mut frame = String::new();
	if let Some(event) = event {
		frame.push_str(&format!("event: {event}\n"));
	}
	frame.push_str(&format!("data: {payload}\n\n"));
	Bytes::from(frame)
}

/// Bad parameters are the caller's fault, anything else is ours.
fn error_response(error: &ModelError) -> HttpResponse {
	let body = json!({ "detail": error.to_string() });
	match error {
		ModelError::InvalidConfiguration(_) => HttpResponse::BadRequest().json(body),
		_ => HttpResponse::InternalServerError().json(body),
	}
}

#[get("/health")]
async fn get_health() -> impl Responder {
	HttpResponse::Ok().json(json!({ "status": "healthy" }))
}

#[get("/")]
async fn get_root(data: web::Data<AppState>) -> impl Responder {
	HttpResponse::Ok().json(json!({
		"status": "ok",
		"service": "story-gen",
		"vocab_size": data.tokenizer.vocab_size(),
		"tokenizer_mode": data.tokenizer.mode().name(),
		"smoothing": data.model.smoothing().name(),
		"trained_tokens": data.model.counts().total(),
	}))
}

/// HTTP POST endpoint `/v1/generate`
///
/// Generates a whole continuation and returns it as JSON.
#[post("/v1/generate")]
async fn post_generate(data: web::Data<AppState>, params: web::Json<GenerateParams>) -> impl Responder {
	let config = params.config();
	if let Err(e) = config.validate() {
		return error_response(&e);
	}

	let state = data.into_inner();
	let prefix = params.into_inner().prefix;
	match web::block(move || state.generate(&prefix, &config)).await {
		Ok(Ok(response)) => HttpResponse::Ok().json(response),
		Ok(Err(e)) => error_response(&e),
		Err(_) => HttpResponse::InternalServerError().json(json!({ "detail": "generation worker failed" })),
	}
}

/// HTTP GET endpoint `/v1/generate/stream`
///
/// Streams the continuation as Server-Sent Events while it is sampled.
#[get("/v1/generate/stream")]
async fn get_generate_stream(data: web::Data<AppState>, query: web::Query<GenerateParams>) -> impl Responder {
	let config = query.config();
	if let Err(e) = config.validate() {
		return error_response(&e);
	}

	let state = data.into_inner();
	let prefix = query.into_inner().prefix;
	let (tx, rx) = mpsc::unbounded();
	rt::task::spawn_blocking(move || state.stream(&prefix, &config, &tx));

	HttpResponse::Ok()
		.content_type("text/event-stream")
		.insert_header(("Cache-Control", "no-cache"))
		.streaming(rx)
}

fn configure(cfg: &mut web::ServiceConfig) {
	cfg.service(get_health)
		.service(get_root)
		.service(post_generate)
		.service(get_generate_stream);
}

/// Main entry point for the server.
///
/// Loads both artifacts once, shares them read-only across workers and
/// serves until interrupted. Fails at startup if an artifact is missing,
/// corrupt, or if the two were not trained together.
#[actix_web::main]
async fn main() -> io::Result<()> {
	env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
	let args = Args::parse();

	let state = AppState::load(&args.tokenizer, &args.model).map_err(io::Error::other)?;
	info!(
		"loaded {} tokenizer ({} symbols) and {} trigram model ({} tokens)",
		state.tokenizer.mode().name(),
		state.tokenizer.vocab_size(),
		state.model.smoothing().name(),
		state.model.counts().total()
	);
	let state = web::Data::new(state);

	info!("listening on {}:{}", args.host, args.port);
	HttpServer::new(move || {
		App::new()
			.wrap(Cors::permissive())
			.wrap(Logger::default())
			.app_data(state.clone())
			.configure(configure)
	})
		.bind((args.host.as_str(), args.port))?
		.run()
		.await
}

#[cfg(test)]
mod tests {
	use actix_web::http::StatusCode;
	use actix_web::test;

	use super::*;
	use story_gen_core::{TokenizerConfig, train_trigram};

	fn state() -> web::Data<AppState> {
		let corpus = ["ایک تھا بادشاہ <EOT>", "ایک تھا چوہا <EOT>"];
		let tokenizer = TokenizerArtifact::train(&corpus, &TokenizerConfig::whole_word(16)).unwrap();
		let model = train_trigram(&tokenizer, &corpus, (0.1, 0.3, 0.6)).unwrap();
		web::Data::new(AppState { tokenizer, model })
	}

	#[actix_web::test]
	async fn health_reports_healthy() {
		let app = test::init_service(App::new().app_data(state()).configure(configure)).await;
		let req = test::TestRequest::get().uri("/health").to_request();
		let body: Value = test::call_and_read_body_json(&app, req).await;
		assert_eq!(body, json!({ "status": "healthy" }));
	}

	#[actix_web::test]
	async fn root_reports_artifacts() {
		let app = test::init_service(App::new().app_data(state()).configure(configure)).await;
		let req = test::TestRequest::get().uri("/").to_request();
		let body: Value = test::call_and_read_body_json(&app, req).await;
		assert_eq!(body["tokenizer_mode"], "whole_word");
		assert_eq!(body["smoothing"], "interpolated");
	}

	#[actix_web::test]
	async fn prefix_continues_with_an_observed_ending() {
		let app = test::init_service(App::new().app_data(state()).configure(configure)).await;
		for seed in 0..10 {
			let req = test::TestRequest::post()
				.uri("/v1/generate")
				.set_json(json!({ "prefix": "ایک تھا", "max_length": 5, "seed": seed }))
				.to_request();
			let body: Value = test::call_and_read_body_json(&app, req).await;
			let continuation = body["continuation"].as_str().unwrap();
			assert!(continuation == "بادشاہ" || continuation == "چوہا", "{continuation:?}");
			assert_eq!(body["tokens_generated"], 2);
		}
	}

	#[actix_web::test]
	async fn generate_returns_bounded_story() {
		let app = test::init_service(App::new().app_data(state()).configure(configure)).await;
		let req = test::TestRequest::post()
			.uri("/v1/generate")
			.set_json(json!({ "prefix": "ایک تھا", "max_length": 5, "seed": 7 }))
			.to_request();
		let body: Value = test::call_and_read_body_json(&app, req).await;
		assert!(body["tokens_generated"].as_u64().unwrap() <= 5);
		assert!(body["story"].as_str().unwrap().starts_with("ایک تھا"));
	}

	#[actix_web::test]
	async fn negative_length_gives_empty_continuation() {
		let app = test::init_service(App::new().app_data(state()).configure(configure)).await;
		let req = test::TestRequest::post()
			.uri("/v1/generate")
			.set_json(json!({ "prefix": "ایک", "max_length": -3 }))
			.to_request();
		let body: Value = test::call_and_read_body_json(&app, req).await;
		assert_eq!(body["continuation"], "");
		assert_eq!(body["tokens_generated"], 0);
	}

	#[actix_web::test]
	async fn zero_temperature_is_bad_request() {
		let app = test::init_service(App::new().app_data(state()).configure(configure)).await;
		let req = test::TestRequest::post()
			.uri("/v1/generate")
			.set_json(json!({ "prefix": "ایک", "temperature": 0.0 }))
			.to_request();
		let resp = test::call_service(&app, req).await;
		assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
	}

	#[actix_web::test]
	async fn stream_emits_events_then_done() {
		let app = test::init_service(App::new().app_data(state()).configure(configure)).await;
		let req = test::TestRequest::get()
			.uri("/v1/generate/stream?max_length=4&seed=1")
			.to_request();
		let resp = test::call_service(&app, req).await;
		assert_eq!(resp.status(), StatusCode::OK);

		let body = test::read_body(resp).await;
		let text = String::from_utf8(body.to_vec()).unwrap();
		assert!(text.starts_with("data: "));
		assert!(text.contains("event: done\n"));
	}
}
