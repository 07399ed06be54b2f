use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::tensor::{backend_for, Tensor};

// Custom gradients
//
// dimflow does not differentiate anything itself. Operations whose gradient
// the host runtime cannot derive (scatter with respect to its indices) hand a
// forward/backward pair to the backend, which records it with its own
// autodiff machinery. Backends without autodiff simply evaluate `forward`.

/// Signature of the forward function.
pub type ForwardFn = Arc<dyn Fn(&[Tensor]) -> Result<Tensor> + Send + Sync>;

/// Signature of the backward function: one optional gradient per input.
pub type BackwardFn = Arc<dyn Fn(&GradientContext<'_>) -> Result<Vec<Option<Tensor>>> + Send + Sync>;

/// Everything a backward rule may look at.
pub struct GradientContext<'a> {
    pub inputs: &'a [Tensor],
    pub output: &'a Tensor,
    pub grad_output: &'a Tensor,
}

/// An explicit forward/backward function pair.
#[derive(Clone)]
pub struct CustomGradient {
    name: String,
    forward: ForwardFn,
    backward: BackwardFn,
}

impl fmt::Debug for CustomGradient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CustomGradient({})", self.name)
    }
}

impl CustomGradient {
    pub fn new<F, B>(name: impl Into<String>, forward: F, backward: B) -> Self
    where
        F: Fn(&[Tensor]) -> Result<Tensor> + Send + Sync + 'static,
        B: Fn(&GradientContext<'_>) -> Result<Vec<Option<Tensor>>> + Send + Sync + 'static,
    {
        CustomGradient {
            name: name.into(),
            forward: Arc::new(forward),
            backward: Arc::new(backward),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn forward(&self, inputs: &[Tensor]) -> Result<Tensor> {
        (self.forward)(inputs)
    }

    pub fn backward(&self, ctx: &GradientContext<'_>) -> Result<Vec<Option<Tensor>>> {
        (self.backward)(ctx)
    }

    /// Evaluate on `inputs`, registering the backward rule if the chosen
    /// backend records gradients.
    pub fn apply(&self, inputs: &[Tensor]) -> Result<Tensor> {
        let refs: Vec<&Tensor> = inputs.iter().collect();
        let backend = backend_for(&refs)?;
        if backend.supports_gradients() {
            match backend.custom_gradient(self, inputs) {
                Err(e) if e.is_unsupported() => {
                    log::warn!(
                        "backend '{}' cannot record '{}', gradient will not flow",
                        backend.name(),
                        self.name
                    );
                }
                result => return result,
            }
        }
        self.forward(inputs)
    }
}

/// Stop gradient flow through `x`.
pub fn stop_gradient(x: &Tensor) -> Result<Tensor> {
    x.map_native(&|b, n| b.stop_gradient(n))
}
