#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use base64::Engine as _;
    use bytes::Bytes;
    use image::DynamicImage;

    use crate::artifact::{ArtifactData, MediaKind};
    use crate::config::Config;
    use crate::engine::{Engine, EngineBuilder};
    use crate::error::{GenerationError, ProviderError, RouteError, ValidationError};
    use crate::pipeline::{LoadedPipeline, LoaderSet, Pipeline, PipelineJob, PipelineOutput};
    use crate::provider::{PollStatus, ProviderArtifact, ProviderTransport, TransportError};
    use crate::registry::Provider;
    use crate::request::{Family, GenerationRequest, ModelId};

    // ── Fixtures ─────────────────────────────────────────────────────────────

    /// Local stand-in pipeline: yields a solid image or a fixed video clip.
    struct StubPipeline {
        runs: Arc<AtomicUsize>,
        fail: bool,
    }

    impl Pipeline for StubPipeline {
        fn run(&self, job: &PipelineJob) -> anyhow::Result<Vec<PipelineOutput>> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("stub pipeline failure");
            }
            let output = match job.mode.family() {
                Family::Image => {
                    PipelineOutput::Image(DynamicImage::new_rgb8(job.width, job.height))
                }
                Family::Video => PipelineOutput::Video(Bytes::from_static(b"clip-bytes")),
            };
            Ok(vec![output])
        }
    }

    struct Counters {
        loads: Arc<AtomicUsize>,
        runs: Arc<AtomicUsize>,
    }

    fn stub_loaders(models: &[ModelId], fail_run: bool) -> (LoaderSet, Counters) {
        let loads = Arc::new(AtomicUsize::new(0));
        let runs = Arc::new(AtomicUsize::new(0));
        let mut loaders = LoaderSet::new();
        for &model in models {
            let loads = Arc::clone(&loads);
            let runs = Arc::clone(&runs);
            loaders.insert(model, move |_key| {
                loads.fetch_add(1, Ordering::SeqCst);
                Ok(LoadedPipeline {
                    handle: Arc::new(StubPipeline {
                        runs: Arc::clone(&runs),
                        fail: fail_run,
                    }),
                    footprint_gib: 4.0,
                })
            });
        }
        (loaders, Counters { loads, runs })
    }

    /// Gateway stand-in: accepts every submission and succeeds on the first
    /// poll with one URL artifact.
    #[derive(Default)]
    struct FakeGateway {
        submits: AtomicUsize,
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl ProviderTransport for FakeGateway {
        async fn submit(
            &self,
            _provider: Provider,
            model: &str,
            _payload: &serde_json::Value,
        ) -> Result<String, TransportError> {
            let n = self.submits.fetch_add(1, Ordering::SeqCst);
            Ok(format!("{model}-{n}"))
        }

        async fn poll(
            &self,
            _provider: Provider,
            task_id: &str,
        ) -> Result<PollStatus, TransportError> {
            Ok(PollStatus::Succeeded {
                outputs: vec![ProviderArtifact::Url(format!(
                    "https://cdn.example/{task_id}.bin"
                ))],
            })
        }

        async fn cancel(&self, _provider: Provider, _task_id: &str) -> Result<(), TransportError> {
            Ok(())
        }

        async fn fetch(&self, _url: &str) -> Result<Bytes, TransportError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(Bytes::from_static(b"fetched-bytes"))
        }
    }

    fn test_config() -> Config {
        Config {
            memory_budget_gib: 24.0,
            max_cached_models: 2,
            provider_base_url: "http://gateway.test".to_owned(),
            provider_api_key: "test-key".to_owned(),
            provider_timeout_secs: 5,
            poll_initial_ms: 1,
            poll_max_ms: 5,
            log_level: "info".to_owned(),
        }
    }

    fn engine_with(models: &[ModelId]) -> (Engine, Counters, Arc<FakeGateway>) {
        let (loaders, counters) = stub_loaders(models, false);
        let gateway = Arc::new(FakeGateway::default());
        let engine = Engine::with_default_models(&test_config(), loaders, Arc::clone(&gateway) as _)
            .expect("builtin table is consistent");
        (engine, counters, gateway)
    }

    fn encoded_image(width: u32, height: u32) -> String {
        let img = DynamicImage::new_rgb8(width, height);
        let mut buf = std::io::Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
        base64::engine::general_purpose::STANDARD.encode(buf.into_inner())
    }

    fn encoded_video() -> String {
        base64::engine::general_purpose::STANDARD.encode(b"raw-clip")
    }

    // ── End-to-end, local path ───────────────────────────────────────────────

    #[tokio::test]
    async fn text_to_image_produces_one_png_artifact() {
        let (engine, counters, _) = engine_with(&[ModelId::SdXl]);
        let request = GenerationRequest::new(Family::Image, ModelId::SdXl, "a red fox");
        let outcome = engine.execute(request).await.expect("generation succeeds");
        // The original request comes back for audit logging.
        assert_eq!(outcome.request.model, ModelId::SdXl);

        let artifacts = outcome.artifacts;
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].kind, MediaKind::Image);
        let bytes = artifacts[0].data.as_bytes().expect("local path yields bytes");
        // PNG magic: the staging surface encodes, not the pipeline.
        assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");
        assert_eq!(counters.loads.load(Ordering::SeqCst), 1);
        assert_eq!(counters.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn inpainting_runs_with_image_and_mask() {
        let (engine, _, _) = engine_with(&[ModelId::SdXl]);
        let mut request = GenerationRequest::new(Family::Image, ModelId::SdXl, "replace the sky");
        request.image = Some(encoded_image(512, 512));
        request.mask = Some(encoded_image(512, 512));
        let outcome = engine.execute(request).await.expect("inpainting succeeds");
        assert_eq!(outcome.artifacts.len(), 1);
    }

    #[tokio::test]
    async fn local_video_model_yields_video_bytes() {
        let (engine, _, _) = engine_with(&[ModelId::Wan2]);
        let request = GenerationRequest::new(Family::Video, ModelId::Wan2, "waves at dusk");
        let outcome = engine.execute(request).await.expect("generation succeeds");
        assert_eq!(outcome.artifacts.len(), 1);
        assert_eq!(outcome.artifacts[0].kind, MediaKind::Video);
    }

    #[tokio::test]
    async fn repeat_requests_reuse_the_loaded_pipeline() {
        let (engine, counters, _) = engine_with(&[ModelId::SdXl]);
        for _ in 0..3 {
            let request = GenerationRequest::new(Family::Image, ModelId::SdXl, "a red fox");
            engine.execute(request).await.expect("generation succeeds");
        }
        assert_eq!(counters.loads.load(Ordering::SeqCst), 1);
        assert_eq!(counters.runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn pipeline_failure_is_attributed_and_frees_the_accelerator() {
        let (loaders, counters) = stub_loaders(&[ModelId::Flux1], true);
        let gateway = Arc::new(FakeGateway::default());
        let engine = Engine::with_default_models(&test_config(), loaders, gateway as _)
            .expect("builtin table is consistent");

        let request = GenerationRequest::new(Family::Image, ModelId::Flux1, "a red fox");
        let err = engine.execute(request).await.unwrap_err();
        assert!(matches!(err, GenerationError::Inference(_)));
        assert!(!err.is_user_error());
        assert_eq!(counters.runs.load(Ordering::SeqCst), 1);
        let cache = engine.pipeline_cache().expect("default engine has a cache");
        assert_eq!(cache.resident_count(), 0);
    }

    // ── Residency across requests ────────────────────────────────────────────

    #[tokio::test]
    async fn alternating_models_never_share_the_accelerator() {
        let (engine, counters, _) = engine_with(&[ModelId::SdXl, ModelId::Flux1]);
        let cache = engine.pipeline_cache().expect("default engine has a cache").clone();

        for model in [ModelId::SdXl, ModelId::Flux1, ModelId::SdXl, ModelId::Flux1] {
            let request = GenerationRequest::new(Family::Image, model, "a red fox");
            engine.execute(request).await.expect("generation succeeds");
            assert!(cache.resident_count() <= 1);
        }
        // Both fit in host cache, so each was loaded exactly once.
        assert_eq!(counters.loads.load(Ordering::SeqCst), 2);
        assert_eq!(cache.stats().entries, 2);
    }

    #[tokio::test]
    async fn flush_drops_cached_pipelines() {
        let (engine, counters, _) = engine_with(&[ModelId::SdXl]);
        let request = GenerationRequest::new(Family::Image, ModelId::SdXl, "a red fox");
        engine.execute(request).await.expect("generation succeeds");
        engine.flush_pipelines();

        let request = GenerationRequest::new(Family::Image, ModelId::SdXl, "a red fox");
        engine.execute(request).await.expect("generation succeeds");
        assert_eq!(counters.loads.load(Ordering::SeqCst), 2);
    }

    // ── Rejection paths ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn validation_failure_costs_no_pipeline_load() {
        let (engine, counters, gateway) = engine_with(&[ModelId::SdXl]);
        let mut request = GenerationRequest::new(Family::Image, ModelId::SdXl, "a red fox");
        request.mask = Some(encoded_image(64, 64));
        let err = engine.execute(request).await.unwrap_err();

        assert!(err.is_user_error());
        assert!(matches!(
            err,
            GenerationError::Validation(ValidationError::MaskWithoutImage)
        ));
        assert_eq!(counters.loads.load(Ordering::SeqCst), 0);
        assert_eq!(gateway.submits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn capability_mismatch_reports_supported_modes() {
        let (engine, _, gateway) = engine_with(&[]);
        let mut request = GenerationRequest::new(Family::Image, ModelId::DepthAnything2, "");
        request.image = Some(encoded_image(64, 64));
        request.mask = Some(encoded_image(64, 64));
        let err = engine.execute(request).await.unwrap_err();
        match err {
            GenerationError::Validation(ValidationError::UnsupportedMode {
                model,
                supported,
                ..
            }) => {
                assert_eq!(model, ModelId::DepthAnything2);
                assert!(supported.contains("depth"));
            }
            other => panic!("expected UnsupportedMode, got {other:?}"),
        }
        assert_eq!(gateway.submits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn undecodable_payload_is_a_media_error_after_validation() {
        let (engine, counters, _) = engine_with(&[ModelId::SdXl]);
        let mut request = GenerationRequest::new(Family::Image, ModelId::SdXl, "a red fox");
        request.image = Some("not-an-image".to_owned());
        let err = engine.execute(request).await.unwrap_err();
        assert!(matches!(err, GenerationError::Media(_)));
        assert!(err.is_user_error());
        assert_eq!(counters.loads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn pre_cancelled_request_never_starts() {
        let (engine, counters, gateway) = engine_with(&[ModelId::SdXl]);
        let (tx, rx) = tokio::sync::watch::channel(true);
        let request = GenerationRequest::new(Family::Image, ModelId::SdXl, "a red fox");
        let err = engine
            .execute_cancellable(request, Some(rx))
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Cancelled));
        assert_eq!(counters.loads.load(Ordering::SeqCst), 0);
        assert_eq!(gateway.submits.load(Ordering::SeqCst), 0);
        drop(tx);
    }

    // ── End-to-end, external path ────────────────────────────────────────────

    #[tokio::test]
    async fn external_text_to_image_stages_a_reference() {
        let (engine, counters, gateway) = engine_with(&[]);
        let request = GenerationRequest::new(Family::Image, ModelId::GoogleGemini2, "a red fox");
        let artifacts = engine
            .execute(request)
            .await
            .expect("generation succeeds")
            .artifacts;

        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].kind, MediaKind::Image);
        assert!(matches!(artifacts[0].data, ArtifactData::Reference(_)));
        assert_eq!(gateway.submits.load(Ordering::SeqCst), 1);
        // External path must not touch the residency layer.
        assert_eq!(counters.loads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn video_upscale_fetches_bytes_instead_of_staging_a_url() {
        let (engine, _, gateway) = engine_with(&[]);
        let mut request = GenerationRequest::new(Family::Video, ModelId::RunwayUpscale, "");
        request.video = Some(encoded_video());
        let artifacts = engine
            .execute(request)
            .await
            .expect("upscale succeeds")
            .artifacts;

        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].kind, MediaKind::Video);
        assert_eq!(
            artifacts[0].data.as_bytes().map(|b| b.as_ref()),
            Some(&b"fetched-bytes"[..])
        );
        assert_eq!(gateway.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn provider_timeout_is_retryable() {
        /// Never finishes a job.
        struct StuckGateway;

        #[async_trait]
        impl ProviderTransport for StuckGateway {
            async fn submit(
                &self,
                _provider: Provider,
                _model: &str,
                _payload: &serde_json::Value,
            ) -> Result<String, TransportError> {
                Ok("stuck-1".to_owned())
            }

            async fn poll(
                &self,
                _provider: Provider,
                _task_id: &str,
            ) -> Result<PollStatus, TransportError> {
                Ok(PollStatus::Pending)
            }

            async fn cancel(
                &self,
                _provider: Provider,
                _task_id: &str,
            ) -> Result<(), TransportError> {
                Ok(())
            }

            async fn fetch(&self, _url: &str) -> Result<Bytes, TransportError> {
                Err(TransportError::Protocol { message: "unused".to_owned() })
            }
        }

        let mut config = test_config();
        config.provider_timeout_secs = 0;
        let engine = Engine::with_default_models(&config, LoaderSet::new(), Arc::new(StuckGateway))
            .expect("builtin table is consistent");

        let request = GenerationRequest::new(Family::Image, ModelId::Seedream4, "a red fox");
        let err = engine.execute(request).await.unwrap_err();
        assert!(matches!(
            err,
            GenerationError::Provider(ProviderError::Timeout { .. })
        ));
        assert!(err.is_retryable());
    }

    // ── Engine assembly ──────────────────────────────────────────────────────

    #[test]
    fn empty_engine_refuses_to_build() {
        let err = EngineBuilder::new().build().err().unwrap();
        assert_eq!(err, RouteError::EmptyTable);
    }

    #[test]
    fn builtin_engine_covers_every_model_identifier() {
        let (engine, _, _) = engine_with(&[]);
        // Every descriptor resolves; execute() can never hit Unroutable.
        for model in engine.registry().models() {
            let descriptor = engine.registry().describe(model).expect("registered");
            assert!(!descriptor.modes.is_empty());
        }
        assert_eq!(engine.registry().len(), 15);
    }

    #[tokio::test]
    async fn mid_flight_cancellation_surfaces_as_provider_cancelled() {
        /// Stays pending until the test flips the cancel flag.
        struct SlowGateway;

        #[async_trait]
        impl ProviderTransport for SlowGateway {
            async fn submit(
                &self,
                _provider: Provider,
                _model: &str,
                _payload: &serde_json::Value,
            ) -> Result<String, TransportError> {
                Ok("slow-1".to_owned())
            }

            async fn poll(
                &self,
                _provider: Provider,
                _task_id: &str,
            ) -> Result<PollStatus, TransportError> {
                Ok(PollStatus::Pending)
            }

            async fn cancel(
                &self,
                _provider: Provider,
                _task_id: &str,
            ) -> Result<(), TransportError> {
                Ok(())
            }

            async fn fetch(&self, _url: &str) -> Result<Bytes, TransportError> {
                Err(TransportError::Protocol { message: "unused".to_owned() })
            }
        }

        let engine = Engine::with_default_models(
            &test_config(),
            LoaderSet::new(),
            Arc::new(SlowGateway),
        )
        .expect("builtin table is consistent");
        let engine = Arc::new(engine);

        let (tx, rx) = tokio::sync::watch::channel(false);
        let task = tokio::spawn({
            let engine = Arc::clone(&engine);
            async move {
                let request =
                    GenerationRequest::new(Family::Image, ModelId::Seedream4, "a red fox");
                engine.execute_cancellable(request, Some(rx)).await
            }
        });
        tokio::time::sleep(Duration::from_millis(5)).await;
        tx.send(true).expect("receiver alive");
        let err = task.await.expect("join").unwrap_err();
        assert!(matches!(
            err,
            GenerationError::Provider(ProviderError::Cancelled { .. })
        ));
    }
}
