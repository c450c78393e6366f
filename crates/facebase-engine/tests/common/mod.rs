#![allow(dead_code)]

use chrono::{DateTime, Utc};
use facebase_core::{
    Algorithm, Attributes, EmbedderKind, Embedding, FaceEmbedder, Identity, ImageSequence, PixelEmbedder,
    RecognizerError, Sample, TrainingRecord,
};
use facebase_db::{DbError, FaceDb, SqliteFaceDb};
use rusqlite::ffi;
use facebase_engine::{EngineOptions, FaceEngine};
use image::{DynamicImage, GrayImage, Luma};
use std::borrow::Cow;

pub const FACE_SIZE: u32 = 64;

fn gray(f: impl Fn(u32, u32) -> u8) -> DynamicImage {
    DynamicImage::ImageLuma8(GrayImage::from_fn(FACE_SIZE, FACE_SIZE, |x, y| Luma([f(x, y)])))
}

/// Brightness rising left to right. `offset` shifts the overall level.
pub fn horizontal(offset: u8) -> DynamicImage {
    gray(move |x, _| (x * 3) as u8 + offset)
}

/// Brightness rising top to bottom.
pub fn vertical(offset: u8) -> DynamicImage {
    gray(move |_, y| (y * 3) as u8 + offset)
}

pub fn checkerboard() -> DynamicImage {
    gray(|x, y| if (x / 8 + y / 8) % 2 == 0 { 20 } else { 230 })
}

pub fn black() -> DynamicImage {
    gray(|_, _| 0)
}

pub fn white() -> DynamicImage {
    gray(|_, _| 255)
}

/// An image no preparation can succeed on.
pub fn broken() -> DynamicImage {
    DynamicImage::new_luma8(0, 0)
}

pub fn engine() -> FaceEngine {
    engine_with(EngineOptions::default())
}

pub fn engine_with(options: EngineOptions) -> FaceEngine {
    let db = SqliteFaceDb::open_in_memory().expect("in-memory database");
    FaceEngine::open(Box::new(db), options)
}

pub fn attrs(pairs: &[(&str, &str)]) -> Attributes {
    pairs.iter().copied().collect()
}

/// Add `n` identities named person-1 .. person-n.
pub fn people(engine: &FaceEngine, n: usize) -> Vec<Identity> {
    (1..=n)
        .map(|i| {
            let name = format!("person-{i}");
            engine
                .add_identity(attrs(&[("name", name.as_str())]))
                .expect("identity added")
        })
        .collect()
}

/// Sequence that records how often it was advanced.
pub struct CountingImages {
    pub images: Vec<DynamicImage>,
    pub position: usize,
    pub proceed_calls: usize,
}

impl CountingImages {
    pub fn new(images: Vec<DynamicImage>) -> Self {
        Self { images, position: 0, proceed_calls: 0 }
    }
}

impl ImageSequence for CountingImages {
    fn size(&self) -> usize {
        self.images.len()
    }

    fn at_end(&self) -> bool {
        self.position >= self.images.len()
    }

    fn proceed(&mut self, steps: usize) {
        self.proceed_calls += 1;
        self.position = (self.position + steps).min(self.images.len());
    }

    fn image(&self) -> Option<Cow<'_, DynamicImage>> {
        self.images.get(self.position).map(Cow::Borrowed)
    }
}

/// A database that can fail its readiness probe or refuse training writes.
pub struct FlakyDb {
    inner: SqliteFaceDb,
    ready: bool,
    saves: bool,
}

impl FlakyDb {
    fn new(ready: bool, saves: bool) -> Self {
        let inner = SqliteFaceDb::open_in_memory().expect("in-memory database");
        Self { inner, ready, saves }
    }

    pub fn unready() -> Self {
        Self::new(false, true)
    }

    pub fn read_only_training() -> Self {
        Self::new(true, false)
    }
}

impl FaceDb for FlakyDb {
    fn check_ready(&self) -> bool {
        self.ready && self.inner.check_ready()
    }

    fn identities(&self) -> Result<Vec<Identity>, DbError> {
        self.inner.identities()
    }

    fn add_identity(&self, attributes: &Attributes) -> Result<i64, DbError> {
        self.inner.add_identity(attributes)
    }

    fn update_identity(&self, identity: &Identity) -> Result<(), DbError> {
        self.inner.update_identity(identity)
    }

    fn delete_identity(&self, id: i64) -> Result<(), DbError> {
        self.inner.delete_identity(id)
    }

    fn save_training(&self, algorithm: Algorithm, records: &[TrainingRecord]) -> Result<(), DbError> {
        if !self.saves {
            let readonly = ffi::Error::new(ffi::SQLITE_READONLY);
            return Err(DbError::Sqlite(rusqlite::Error::SqliteFailure(readonly, None)));
        }
        self.inner.save_training(algorithm, records)
    }

    fn training(&self, algorithm: Algorithm) -> Result<Vec<TrainingRecord>, DbError> {
        self.inner.training(algorithm)
    }

    fn training_updated_at(&self, algorithm: Algorithm) -> Result<Option<DateTime<Utc>>, DbError> {
        self.inner.training_updated_at(algorithm)
    }

    fn clear_training(&self, algorithm: Algorithm, context: Option<&str>) -> Result<(), DbError> {
        self.inner.clear_training(algorithm, context)
    }

    fn clear_training_for(
        &self,
        algorithm: Algorithm,
        identities: &[i64],
        context: Option<&str>,
    ) -> Result<(), DbError> {
        self.inner.clear_training_for(algorithm, identities, context)
    }

    fn integrity_check(&self) -> Result<bool, DbError> {
        self.inner.integrity_check()
    }

    fn vacuum(&self) -> Result<(), DbError> {
        self.inner.vacuum()
    }
}

/// Pixel embedder that panics on all-white samples.
pub struct FragileEmbedder;

impl FragileEmbedder {
    pub fn kind() -> EmbedderKind {
        EmbedderKind::custom(|| Ok(Box::new(FragileEmbedder) as Box<dyn FaceEmbedder>))
    }
}

impl FaceEmbedder for FragileEmbedder {
    fn input_size(&self) -> u32 {
        PixelEmbedder.input_size()
    }

    fn dimension(&self) -> usize {
        PixelEmbedder.dimension()
    }

    fn default_threshold(&self) -> f32 {
        PixelEmbedder.default_threshold()
    }

    fn model_version(&self) -> &str {
        "fragile"
    }

    fn embed(&mut self, sample: &Sample) -> Result<Embedding, RecognizerError> {
        if sample.pixels().iter().all(|&p| p == 255) {
            panic!("native fault on saturated sample");
        }
        PixelEmbedder.embed(sample)
    }
}
