use comms::specs::runtime::RuntimeSpec;
use ndarray::Array4;

use crate::Result;

/// A class conditional velocity predictor.
#[allow(unused)]
#[trait_variant::make(VelocityModel: Send)]
pub trait VelocityModelTemplate {
    /// Predicts the velocity of the flow at time `t`.
    ///
    /// # Arguments
    /// * `x` - A batch of latents shaped `(N, C, H, W)`.
    /// * `t` - The flow time, shared by the whole batch.
    /// * `labels` - One class label per latent, `num_classes` being the null class.
    ///
    /// # Returns
    /// The velocity, shaped like `x`.
    async fn forward(&mut self, x: &Array4<f32>, t: f32, labels: &[u32]) -> Result<Array4<f32>>;
}

/// Maps latents to pixels in `[-1, 1]`.
#[allow(unused)]
#[trait_variant::make(Decoder: Send)]
pub trait DecoderTemplate {
    /// Decodes a batch of denormalized latents into images shaped `(N, 3, H, W)`.
    async fn decode(&mut self, latents: &Array4<f32>) -> Result<Array4<f32>>;
}

/// The live handles a runtime hands out once the weights are in place.
pub struct Loaded<M, D> {
    pub model: M,
    pub decoder: D,
    /// Parameters of the generative model.
    pub model_params: u64,
    /// Parameters of the representation projectors alone.
    pub projector_params: u64,
}

/// Instantiates the generative model and the autoencoder somewhere they can run.
#[allow(unused)]
#[trait_variant::make(Runtime: Send)]
pub trait RuntimeTemplate {
    type Model: VelocityModel;
    type Decoder: Decoder;

    /// Loads the weights described by `spec`.
    async fn load(self, spec: RuntimeSpec) -> Result<Loaded<Self::Model, Self::Decoder>>;
}
