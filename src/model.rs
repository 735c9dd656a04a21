//! Model construction and checkpointing.
//!
//! Architectures are declared as data ([`ModelSettings`]) and built into an
//! opaque [`Model`] over a `tch` variable store. Trainers only rely on the
//! forward contracts: `forward` for feedforward models, `init_hidden` +
//! `forward_seq` for recurrent ones.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tch::{
    nn::{self, ModuleT, RNN},
    Kind, Tensor,
};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub enum ModelLayer {
    Linear(i64),
    Relu,
    Sigmoid,
    Silu,
}

fn build_seq(root: &nn::Path, layers: &[ModelLayer], input_size: i64) -> (nn::SequentialT, i64) {
    let mut last_size = input_size;
    let mut seq = nn::seq_t();
    for (i, layer) in layers.iter().enumerate() {
        match layer {
            ModelLayer::Linear(size) => {
                let size = *size;
                seq = seq.add(nn::linear(
                    root / format!("layer{i}"),
                    last_size,
                    size,
                    Default::default(),
                ));
                last_size = size;
            }
            ModelLayer::Relu => {
                seq = seq.add_fn(|xs| xs.relu());
            }
            ModelLayer::Sigmoid => {
                seq = seq.add_fn(|xs| xs.sigmoid());
            }
            ModelLayer::Silu => {
                seq = seq.add_fn(|xs| xs.silu());
            }
        }
    }
    (seq, last_size)
}

/// Model architecture information.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub enum ModelSettings {
    /// Plain feedforward stack with a final output layer. With
    /// `softmax_output` the model emits probabilities, otherwise raw
    /// scores (logits or Q-values).
    Feedforward {
        layers: Vec<ModelLayer>,
        softmax_output: bool,
    },
    /// GRU over decision sequences, followed by a linear head applied at
    /// every step.
    Recurrent {
        hidden_size: i64,
        num_layers: i64,
        softmax_output: bool,
    },
}

enum ModelFunc {
    Feedforward {
        seq: nn::SequentialT,
        softmax: bool,
    },
    Recurrent {
        gru: nn::GRU,
        head: nn::Linear,
        hidden_size: i64,
        num_layers: i64,
        softmax: bool,
    },
}

pub struct Model {
    pub vs: nn::VarStore,
    func: ModelFunc,
}

impl Model {
    pub fn new(
        device: tch::Device,
        input_size: i64,
        output_size: i64,
        settings: &ModelSettings,
    ) -> Self {
        let vs = nn::VarStore::new(device);
        let root = &vs.root();
        let func = match settings {
            ModelSettings::Feedforward {
                layers,
                softmax_output,
            } => {
                let (mut seq, last_size) = build_seq(root, layers, input_size);
                // Add the final output layer
                seq = seq.add(nn::linear(
                    root / "output",
                    last_size,
                    output_size,
                    Default::default(),
                ));
                ModelFunc::Feedforward {
                    seq,
                    softmax: *softmax_output,
                }
            }
            ModelSettings::Recurrent {
                hidden_size,
                num_layers,
                softmax_output,
            } => {
                let gru = nn::gru(
                    root / "gru",
                    input_size,
                    *hidden_size,
                    nn::RNNConfig {
                        num_layers: *num_layers,
                        batch_first: true,
                        ..Default::default()
                    },
                );
                let head = nn::linear(root / "output", *hidden_size, output_size, Default::default());
                ModelFunc::Recurrent {
                    gru,
                    head,
                    hidden_size: *hidden_size,
                    num_layers: *num_layers,
                    softmax: *softmax_output,
                }
            }
        };
        Self { vs, func }
    }

    /// Returns true if the model consumes decision sequences.
    pub fn is_recurrent(&self) -> bool {
        matches!(&self.func, ModelFunc::Recurrent { .. })
    }

    /// Fresh zeroed hidden state for a batch. Panics if the model type
    /// doesn't match.
    pub fn init_hidden(&self, batch_size: i64) -> Tensor {
        if let ModelFunc::Recurrent {
            hidden_size,
            num_layers,
            ..
        } = &self.func
        {
            Tensor::zeros(
                [*num_layers, batch_size, *hidden_size],
                (Kind::Float, self.vs.device()),
            )
        } else {
            panic!("Mismatched model type (expected recurrent)")
        }
    }

    /// A forward pass on a feedforward model. Panics if the model type
    /// doesn't match.
    pub fn forward(&self, input: &Tensor, train: bool) -> Tensor {
        if let ModelFunc::Feedforward { seq, softmax } = &self.func {
            let out = seq.forward_t(input, train);
            if *softmax {
                out.softmax(-1, Kind::Float)
            } else {
                out
            }
        } else {
            panic!("Mismatched model type (expected feedforward)")
        }
    }

    /// A forward pass over a `[B, S, F]` context, threading the hidden
    /// state. Returns the per-step output `[B, S, A]` and the next hidden
    /// state. Panics if the model type doesn't match.
    pub fn forward_seq(&self, context: &Tensor, hidden: &Tensor) -> (Tensor, Tensor) {
        if let ModelFunc::Recurrent {
            gru, head, softmax, ..
        } = &self.func
        {
            let (out, state) = gru.seq_init(context, &nn::GRUState(hidden.shallow_clone()));
            let out = out.apply(head);
            let out = if *softmax {
                out.softmax(-1, Kind::Float)
            } else {
                out
            };
            (out, state.0)
        } else {
            panic!("Mismatched model type (expected recurrent)")
        }
    }

    /// Copies parameters from another model.
    /// Panics on error (mismatch).
    pub fn copy_from(&mut self, other: &Model) {
        self.vs.copy(&other.vs).expect("Cannot copy from model");
    }

    /// Save the model parameters into the given checkpoint file.
    pub fn save(&self, path: &Path) -> Result<(), tch::TchError> {
        self.vs.save(path)
    }
}

/// Build a model, restoring parameters from `path` when a checkpoint
/// exists. A missing checkpoint is a cold start, not an error.
pub fn load_or_init(
    path: &Path,
    settings: &ModelSettings,
    device: tch::Device,
    input_size: i64,
    output_size: i64,
) -> Result<Model, tch::TchError> {
    let mut model = Model::new(device, input_size, output_size, settings);
    if path.exists() {
        model.vs.load(path)?;
    }
    Ok(model)
}
