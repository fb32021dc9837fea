use std::{iter, sync::Arc};

use rearch::CapsuleHandle;
use tracing::{instrument, warn};

use crate::{
    error::{ErrorKind, LinkError, LinkResult},
    link::{SHORT_CODE_ALPHABET, SHORT_CODE_LEN, ShortCode},
    link_store::{LinkExistence, link_store_capsule},
};

pub const MAX_GENERATION_ATTEMPTS: usize = 10_000;

pub fn code_generator_capsule(CapsuleHandle { mut get, .. }: CapsuleHandle) -> Arc<CodeGenerator> {
    let store = Arc::clone(get.as_ref(link_store_capsule));
    Arc::new(CodeGenerator::new(store))
}

pub struct CodeGenerator {
    existence: Arc<dyn LinkExistence>,
}

impl CodeGenerator {
    pub fn new(existence: Arc<dyn LinkExistence>) -> Self {
        Self { existence }
    }

    /// Draws random codes until one is not taken.
    ///
    /// # Errors
    /// Will return [`ErrorKind::GenerationExhausted`] if [`MAX_GENERATION_ATTEMPTS`]
    /// candidates all collide.
    #[instrument(skip(self))]
    pub fn generate_unique_code(&self) -> LinkResult<ShortCode> {
        for attempt in 0..MAX_GENERATION_ATTEMPTS {
            let candidate = random_base62();
            if !self.existence.exists(&candidate) {
                return ShortCode::new(candidate)
                    .map_err(|err| LinkError::new(ErrorKind::GenerationExhausted, err.to_string()));
            }
            if attempt > 0 && attempt % 1000 == 0 {
                warn!(attempt, "Still colliding while generating a short code");
            }
        }

        Err(LinkError::new(
            ErrorKind::GenerationExhausted,
            format!("every one of {MAX_GENERATION_ATTEMPTS} generated codes was already taken"),
        ))
    }
}

// NOTE: rand's thread-local generator is a CSPRNG
fn random_base62() -> String {
    iter::repeat_with(|| {
        char::from(SHORT_CODE_ALPHABET[rand::random_range(0..SHORT_CODE_ALPHABET.len())])
    })
    .take(SHORT_CODE_LEN)
    .collect()
}
