use crate::config::EngineConfig;
use crate::identity_store::IdentityStore;
use crate::params::{ParamValue, Parameters};
use crate::recognition;
use crate::training::{self, TrainingReport};
use facebase_core::cluster::{self, DEFAULT_MIN_POINTS};
use facebase_core::preprocess::contained;
use facebase_core::recognizer::{self, RecognizerError};
use facebase_core::types::UUID_KEY;
use facebase_core::{
    Algorithm, Attributes, EmbedderKind, Identity, ImageList, ImageSequence, Preprocessor, Recognizer,
    SimpleTrainingData, TrainingDataProvider,
};
use facebase_db::{DbError, FaceDb, SqliteFaceDb};
use image::DynamicImage;
use parking_lot::ReentrantMutex;
use serde::Serialize;
use std::cell::{Cell, RefCell};

/// Square edge, in pixels, callers should crop faces to.
const RECOMMENDED_IMAGE_SIZE: u32 = 256;

/// How expensive training is relative to recognition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrainingCostHint {
    /// Training a few images is about as costly as recognizing them.
    Cheap,
    /// Training rebuilds large parts of the model.
    Expensive,
}

/// Construction options for [`FaceEngine`].
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub algorithm: Algorithm,
    pub embedder: EmbedderKind,
    /// Eigen and fisher selections are demoted to histogram when set.
    pub embedding_capable: bool,
    pub parameters: Parameters,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::Histogram,
            embedder: EmbedderKind::Pixel,
            embedding_capable: true,
            parameters: Parameters::new(),
        }
    }
}

impl From<&EngineConfig> for EngineOptions {
    fn from(config: &EngineConfig) -> Self {
        Self {
            algorithm: config.algorithm,
            embedder: config.embedder_kind(),
            embedding_capable: config.embedding_capable,
            parameters: config.parameters(),
        }
    }
}

/// State behind the engine lock. Only one thread holds the lock at a time;
/// the cells let the owning thread re-enter without aliasing `&mut`.
struct EngineState {
    db: Box<dyn FaceDb>,
    available: bool,
    embedder: EmbedderKind,
    embedding_capable: bool,
    algorithm: Cell<Algorithm>,
    params: RefCell<Parameters>,
    store: RefCell<IdentityStore>,
    backend: RefCell<Option<Box<dyn Recognizer>>>,
}

impl EngineState {
    /// Run `f` on the active backend, constructing it first if needed.
    /// `None` when no backend can be built for the active algorithm.
    fn with_backend<R>(&self, f: impl FnOnce(&mut dyn Recognizer) -> R) -> Option<R> {
        let mut slot = self.backend.borrow_mut();
        if slot.is_none() {
            *slot = self.load_backend();
        }
        match slot.as_mut() {
            Some(backend) => Some(f(&mut **backend)),
            None => None,
        }
    }

    fn load_backend(&self) -> Option<Box<dyn Recognizer>> {
        let algorithm = self.algorithm.get();
        let mut backend = self.create_backend(algorithm)?;

        let records = match self.db.training(algorithm) {
            Ok(records) => records,
            Err(e) => {
                tracing::error!(algorithm = %algorithm, error = %e, "failed to read stored model");
                Vec::new()
            }
        };
        let stored = records.len();
        if contained("restore", || backend.restore(records)).is_none() {
            tracing::warn!(algorithm = %algorithm, "stored model discarded; starting empty");
            backend = self.create_backend(algorithm)?;
        }

        self.params.borrow().apply(&mut *backend);

        let updated_at = self.db.training_updated_at(algorithm).ok().flatten();
        tracing::info!(
            algorithm = %algorithm,
            stored,
            vectors = backend.len(),
            updated_at = ?updated_at,
            "recognizer backend loaded"
        );
        Some(backend)
    }

    fn create_backend(&self, algorithm: Algorithm) -> Option<Box<dyn Recognizer>> {
        match recognizer::create(algorithm, &self.embedder) {
            Ok(backend) => Some(backend),
            Err(RecognizerError::UnknownAlgorithm(algorithm)) => {
                unknown_algorithm(algorithm, "create");
                None
            }
            Err(e) => {
                tracing::error!(algorithm = %algorithm, error = %e, "failed to create recognizer backend");
                None
            }
        }
    }

    /// Destroy the handle so the next use reloads it from the database.
    fn drop_backend(&self) {
        if self.backend.borrow_mut().take().is_some() {
            tracing::debug!(algorithm = %self.algorithm.get(), "recognizer backend dropped");
        }
    }
}

/// Face recognition engine: identity directory, training and recognition
/// over one database.
///
/// Every public operation holds one reentrant lock for its whole duration,
/// so calls from several threads are serialized while calls made from inside
/// a locked operation on the same thread proceed.
///
/// Failures never surface as errors. An unavailable database turns every
/// operation into a no-op; numeric failures are logged and reported as
/// "no match" or a skipped identity.
pub struct FaceEngine {
    state: ReentrantMutex<EngineState>,
}

impl FaceEngine {
    pub fn open(db: Box<dyn FaceDb>, options: EngineOptions) -> Self {
        let available = db.check_ready();
        let store = if available {
            IdentityStore::load(db.as_ref())
        } else {
            tracing::warn!("face database not ready; engine inactive");
            IdentityStore::default()
        };
        let algorithm = effective_algorithm(options.algorithm, options.embedding_capable);

        tracing::info!(
            algorithm = %algorithm,
            identities = store.len(),
            available,
            "face engine opened"
        );

        Self {
            state: ReentrantMutex::new(EngineState {
                db,
                available,
                embedder: options.embedder,
                embedding_capable: options.embedding_capable,
                algorithm: Cell::new(algorithm),
                params: RefCell::new(options.parameters),
                store: RefCell::new(store),
                backend: RefCell::new(None),
            }),
        }
    }

    /// Open the SQLite database named by `config` and build the engine from it.
    pub fn from_config(config: &EngineConfig) -> Result<Self, DbError> {
        let db = SqliteFaceDb::open(&config.db_path)?;
        Ok(Self::open(Box::new(db), EngineOptions::from(config)))
    }

    /// Whether the database passed its readiness probe at construction.
    pub fn is_available(&self) -> bool {
        self.state.lock().available
    }

    // --- Identities ---

    pub fn all_identities(&self) -> Vec<Identity> {
        let state = self.state.lock();
        let identities = state.store.borrow().all();
        identities
    }

    pub fn identity(&self, id: i64) -> Option<Identity> {
        let state = self.state.lock();
        let identity = state.store.borrow().get(id);
        identity
    }

    /// First identity holding the exact `(key, value)` attribute pair.
    pub fn find_identity_by(&self, key: &str, value: &str) -> Option<Identity> {
        let state = self.state.lock();
        let identity = state.store.borrow().find_by_attribute(key, value);
        identity
    }

    /// Resolve candidate attributes: uuid alone decides when present, then
    /// full name, then name, then every other key in candidate order.
    pub fn find_identity(&self, candidates: &Attributes) -> Option<Identity> {
        let state = self.state.lock();
        let identity = state.store.borrow().find(candidates);
        identity
    }

    /// Create an identity, or return the existing one when `attributes`
    /// carries a uuid that is already known. The existing identity is
    /// returned unchanged; the other attributes are not merged into it.
    pub fn add_identity(&self, attributes: Attributes) -> Option<Identity> {
        let state = self.state.lock();
        if !state.available {
            return None;
        }

        if let Some(uuid) = attributes.get(UUID_KEY) {
            if let Some(existing) = self.find_identity_by(UUID_KEY, uuid) {
                tracing::debug!(id = existing.id, uuid, "identity already known");
                return Some(existing);
            }
        }

        let created = state.store.borrow_mut().create(state.db.as_ref(), attributes);
        created.map_err(|e| db_failure("add identity", e)).ok()
    }

    /// Append one attribute pair to a known identity.
    pub fn add_identity_attribute(&self, id: i64, key: &str, value: &str) -> Option<Identity> {
        let mut attributes = Attributes::new();
        attributes.push(key, value);
        self.add_identity_attributes(id, &attributes)
    }

    /// Append every pair of `attributes` to a known identity.
    pub fn add_identity_attributes(&self, id: i64, attributes: &Attributes) -> Option<Identity> {
        let state = self.state.lock();
        if !state.available {
            return None;
        }
        let updated = state
            .store
            .borrow_mut()
            .add_attributes(state.db.as_ref(), id, attributes);
        updated.map_err(|e| db_failure("add attributes", e)).ok().flatten()
    }

    /// Replace the attributes of a known identity, keeping its uuid.
    pub fn set_identity_attributes(&self, id: i64, attributes: Attributes) -> Option<Identity> {
        let state = self.state.lock();
        if !state.available {
            return None;
        }
        let updated = state
            .store
            .borrow_mut()
            .set_attributes(state.db.as_ref(), id, attributes);
        updated.map_err(|e| db_failure("set attributes", e)).ok().flatten()
    }

    /// Remove an identity and its training data. Returns whether it existed.
    pub fn delete_identity(&self, identity: &Identity) -> bool {
        let state = self.state.lock();
        if !state.available {
            return false;
        }
        let removed = state.store.borrow_mut().remove(state.db.as_ref(), identity.id);
        match removed {
            Ok(true) => {
                // The database dropped the training records with the identity.
                state.drop_backend();
                true
            }
            Ok(false) => false,
            Err(e) => {
                db_failure("delete identity", e);
                false
            }
        }
    }

    // --- Algorithm and parameters ---

    pub fn algorithm(&self) -> Algorithm {
        self.state.lock().algorithm.get()
    }

    /// Stable name of the active recognizer.
    pub fn backend_identifier(&self) -> &'static str {
        self.algorithm().identifier()
    }

    /// Switch the active algorithm and return the one actually selected.
    ///
    /// On an embedding-capable engine, eigen and fisher are replaced by
    /// histogram.
    pub fn set_algorithm(&self, algorithm: Algorithm) -> Algorithm {
        let state = self.state.lock();
        let effective = effective_algorithm(algorithm, state.embedding_capable);
        if effective != state.algorithm.get() {
            state.drop_backend();
            state.algorithm.set(effective);
            tracing::info!(algorithm = %effective, "recognition algorithm selected");
        }
        effective
    }

    pub fn set_parameter(&self, key: &str, value: impl Into<ParamValue>) {
        let mut params = Parameters::new();
        params.insert(key, value);
        self.set_parameters(params);
    }

    /// Merge `params` into the stored parameters and re-apply all of them to
    /// the active backend, if one is constructed.
    pub fn set_parameters(&self, params: Parameters) {
        let state = self.state.lock();
        state.params.borrow_mut().extend(params);

        let params = state.params.borrow();
        let mut backend = state.backend.borrow_mut();
        match backend.as_mut() {
            Some(backend) => params.apply(&mut **backend),
            None if state.algorithm.get() == Algorithm::Fisher => {
                unknown_algorithm(Algorithm::Fisher, "set parameters")
            }
            None => {}
        }
    }

    /// The raw parameter mapping as set, not the values a backend resolved.
    pub fn parameters(&self) -> Parameters {
        let state = self.state.lock();
        let params = state.params.borrow().clone();
        params
    }

    pub fn recommended_image_size(&self) -> u32 {
        RECOMMENDED_IMAGE_SIZE
    }

    pub fn training_cost_hint(&self) -> TrainingCostHint {
        TrainingCostHint::Cheap
    }

    // --- Recognition ---

    pub fn recognize_face(&self, image: &DynamicImage) -> Option<Identity> {
        self.recognize_faces(std::slice::from_ref(image))
            .into_iter()
            .next()
            .flatten()
    }

    /// One entry per image, in input order: the matched identity or `None`.
    pub fn recognize_faces(&self, images: &[DynamicImage]) -> Vec<Option<Identity>> {
        let mut sequence = ImageList::new(images.to_vec());
        self.recognize_sequence(&mut sequence)
    }

    /// Recognize every remaining image of `images`, advancing once per image.
    pub fn recognize_sequence(&self, images: &mut dyn ImageSequence) -> Vec<Option<Identity>> {
        let state = self.state.lock();
        if !state.available {
            return Vec::new();
        }

        let Some(spec) = state.with_backend(|backend| backend.sample_spec()) else {
            let mut results = Vec::with_capacity(images.size());
            while !images.at_end() {
                images.proceed(1);
                results.push(None);
            }
            return results;
        };

        let preprocessor = Preprocessor::new(spec);
        let predictions = recognition::predict_all(images, &preprocessor, |sample| {
            state
                .with_backend(|backend| contained("recognize", || backend.recognize(sample)))
                .flatten()
        });

        let store = state.store.borrow();
        let results: Vec<Option<Identity>> = predictions
            .into_iter()
            .map(|prediction| prediction.and_then(|p| store.get(p.label)))
            .collect();

        tracing::debug!(
            images = results.len(),
            matched = results.iter().filter(|r| r.is_some()).count(),
            "recognition finished"
        );
        results
    }

    /// Group images showing the same face. One entry per image: a cluster
    /// number, or `None` for noise and images that could not be embedded.
    ///
    /// Uses the configured embedder independently of the active recognizer.
    pub fn cluster_faces(&self, images: &[DynamicImage]) -> Vec<Option<usize>> {
        let state = self.state.lock();
        if !state.available || images.is_empty() {
            return Vec::new();
        }

        let mut embedder = match state.embedder.load() {
            Ok(embedder) => embedder,
            Err(e) => {
                tracing::error!(error = %e, "failed to load embedder for clustering");
                return vec![None; images.len()];
            }
        };

        let preprocessor = Preprocessor::new(embedder.sample_spec());
        let mut positions = Vec::with_capacity(images.len());
        let mut embeddings = Vec::with_capacity(images.len());
        for (position, image) in images.iter().enumerate() {
            let sample = preprocessor.prepare(image);
            if sample.is_empty() {
                continue;
            }
            if let Some(embedding) = contained("embed", || embedder.embed(&sample)) {
                positions.push(position);
                embeddings.push(embedding);
            }
        }

        let min_similarity = state
            .params
            .borrow()
            .threshold()
            .unwrap_or_else(|| embedder.default_threshold());

        let mut clusters = vec![None; images.len()];
        let labels = cluster::dbscan(&embeddings, min_similarity, DEFAULT_MIN_POINTS);
        for (position, label) in positions.into_iter().zip(labels) {
            clusters[position] = label;
        }
        clusters
    }

    // --- Training ---

    /// Train the active recognizer on each identity's new images from
    /// `provider`, in order. Identities without a usable image are skipped
    /// and the batch continues.
    ///
    /// The trained records are persisted unless `context` mentions
    /// "debug" or "test".
    pub fn train(
        &self,
        identities: &[Identity],
        provider: &mut dyn TrainingDataProvider,
        context: &str,
    ) -> TrainingReport {
        let state = self.state.lock();
        let mut report = TrainingReport::default();
        if !state.available || identities.is_empty() {
            return report;
        }

        let algorithm = state.algorithm.get();
        let Some(spec) = state.with_backend(|backend| backend.sample_spec()) else {
            report.skipped = identities.iter().map(|i| i.id).collect();
            return report;
        };
        let preprocessor = Preprocessor::new(spec);
        let persist = training::persists(context);

        for identity in identities {
            let gathered = training::gather(provider.new_images(identity), &preprocessor);
            if gathered.samples.is_empty() {
                tracing::warn!(
                    id = identity.id,
                    failed = gathered.failed,
                    "no usable training image; identity skipped"
                );
                report.skipped.push(identity.id);
                continue;
            }

            let labels = vec![identity.id; gathered.samples.len()];
            let records = state
                .with_backend(|backend| {
                    contained("train", || backend.train(&gathered.samples, &labels, context))
                })
                .flatten();

            let Some(records) = records else {
                // A failed train may leave the model half-updated.
                state.drop_backend();
                report.skipped.push(identity.id);
                continue;
            };

            if persist {
                if let Err(e) = state.db.save_training(algorithm, &records) {
                    db_failure("save training", e);
                    // Reload from what the database holds.
                    state.drop_backend();
                    report.skipped.push(identity.id);
                    continue;
                }
            }

            tracing::info!(
                id = identity.id,
                samples = records.len(),
                failed = gathered.failed,
                context,
                persisted = persist,
                "identity trained"
            );
            report.trained.push(identity.id);
        }
        report
    }

    pub fn train_identity(
        &self,
        identity: &Identity,
        provider: &mut dyn TrainingDataProvider,
        context: &str,
    ) -> TrainingReport {
        self.train(std::slice::from_ref(identity), provider, context)
    }

    pub fn train_images(&self, identity: &Identity, images: Vec<DynamicImage>, context: &str) -> TrainingReport {
        let mut provider = SimpleTrainingData::new(identity, images);
        self.train_identity(identity, &mut provider, context)
    }

    pub fn train_image(&self, identity: &Identity, image: &DynamicImage, context: &str) -> TrainingReport {
        self.train_images(identity, vec![image.clone()], context)
    }

    /// Clear training data of every algorithm, for one context or all of them.
    pub fn clear_all_training(&self, context: Option<&str>) {
        let state = self.state.lock();
        if !state.available {
            return;
        }

        state.drop_backend();
        for algorithm in Algorithm::ALL {
            if algorithm == Algorithm::Fisher {
                continue;
            }
            if let Err(e) = state.db.clear_training(algorithm, context) {
                db_failure("clear training", e);
            }
        }
        tracing::info!(context = ?context, "all training cleared");
    }

    /// Clear the active algorithm's training data of `identities`.
    pub fn clear_training(&self, identities: &[Identity], context: Option<&str>) {
        let state = self.state.lock();
        if !state.available || identities.is_empty() {
            return;
        }

        state.drop_backend();
        let algorithm = state.algorithm.get();
        if algorithm == Algorithm::Fisher {
            unknown_algorithm(algorithm, "clear training");
            return;
        }

        let ids: Vec<i64> = identities.iter().map(|i| i.id).collect();
        if let Err(e) = state.db.clear_training_for(algorithm, &ids, context) {
            db_failure("clear training", e);
            return;
        }
        tracing::info!(algorithm = %algorithm, identities = ids.len(), context = ?context, "training cleared");
    }

    // --- Maintenance ---

    pub fn integrity_check(&self) -> bool {
        let state = self.state.lock();
        if !state.available {
            return false;
        }
        let checked = state.db.integrity_check();
        checked.unwrap_or_else(|e| {
            db_failure("integrity check", e);
            false
        })
    }

    pub fn vacuum(&self) {
        let state = self.state.lock();
        if !state.available {
            return;
        }
        if let Err(e) = state.db.vacuum() {
            db_failure("vacuum", e);
        }
    }
}

fn effective_algorithm(requested: Algorithm, embedding_capable: bool) -> Algorithm {
    match requested {
        Algorithm::Eigen | Algorithm::Fisher if embedding_capable => {
            tracing::warn!(requested = %requested, "algorithm replaced by histogram");
            Algorithm::Histogram
        }
        other => other,
    }
}

fn unknown_algorithm(algorithm: Algorithm, op: &str) {
    tracing::error!(fatal = true, algorithm = %algorithm, op, "no recognizer backend for algorithm");
}

fn db_failure(op: &str, e: DbError) {
    tracing::error!(op, error = %e, "face database operation failed");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(options: EngineOptions) -> FaceEngine {
        FaceEngine::open(Box::new(SqliteFaceDb::open_in_memory().unwrap()), options)
    }

    #[test]
    fn test_demotion() {
        assert_eq!(effective_algorithm(Algorithm::Eigen, true), Algorithm::Histogram);
        assert_eq!(effective_algorithm(Algorithm::Fisher, true), Algorithm::Histogram);
        assert_eq!(effective_algorithm(Algorithm::Eigen, false), Algorithm::Eigen);
        assert_eq!(effective_algorithm(Algorithm::Embedding, true), Algorithm::Embedding);
    }

    #[test]
    fn test_set_algorithm_drops_backend() {
        let engine = engine(EngineOptions::default());
        {
            let state = engine.state.lock();
            assert!(state.with_backend(|b| b.algorithm()).is_some());
            assert!(state.backend.borrow().is_some());
        }

        assert_eq!(engine.set_algorithm(Algorithm::Embedding), Algorithm::Embedding);
        let state = engine.state.lock();
        assert!(state.backend.borrow().is_none());
        assert_eq!(state.with_backend(|b| b.algorithm()), Some(Algorithm::Embedding));
    }

    #[test]
    fn test_fisher_has_no_backend() {
        let engine = engine(EngineOptions {
            algorithm: Algorithm::Fisher,
            embedding_capable: false,
            ..EngineOptions::default()
        });
        assert_eq!(engine.backend_identifier(), "fisher");
        let state = engine.state.lock();
        assert!(state.with_backend(|b| b.len()).is_none());
    }

    #[test]
    fn test_parameters_reach_lazily_built_backend() {
        let engine = engine(EngineOptions {
            algorithm: Algorithm::Embedding,
            ..EngineOptions::default()
        });
        engine.set_parameter("k-nearest", 1i64);
        engine.set_parameter("colour", "blue");

        let params = engine.parameters();
        assert_eq!(params.len(), 2);
        assert_eq!(params.k_nearest(), Some(1));

        // Nothing was built yet; the parameters wait for construction.
        let state = engine.state.lock();
        assert!(state.backend.borrow().is_none());
        assert!(state.with_backend(|b| b.algorithm()).is_some());
    }

    #[test]
    fn test_reentrant_lock() {
        let engine = engine(EngineOptions::default());
        let _outer = engine.state.lock();
        // Same thread, lock already held.
        let ann = engine.add_identity([("name", "Ann")].into_iter().collect()).unwrap();
        assert_eq!(engine.identity(ann.id), Some(ann));
    }

    #[test]
    fn test_constants() {
        let engine = engine(EngineOptions::default());
        assert_eq!(engine.recommended_image_size(), 256);
        assert_eq!(engine.training_cost_hint(), TrainingCostHint::Cheap);
        assert_eq!(engine.backend_identifier(), "histogram");
    }
}
