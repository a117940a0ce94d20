//! Parameter list packing.

use crate::{Direction, KernelDescriptor, KernelError, Param, TensorId};

/// Lay `inputs` then `outputs` into the leading slots of `kernel`'s
/// signature. Missing optional tensors are passed as `None`; every slot
/// past the tensors starts out [`Param::Absent`] for the caller to fill
/// with scalars.
pub fn pack_io(
    kernel: &KernelDescriptor,
    inputs: &[Option<TensorId>],
    outputs: &[Option<TensorId>],
) -> Result<Vec<Param>, KernelError> {
    let count = inputs.len() + outputs.len();
    if count > kernel.params.len() {
        return Err(KernelError::TooManyTensors {
            kernel: kernel.name.clone(),
            count,
            slots: kernel.params.len(),
        });
    }
    let mut params = vec![Param::Absent; kernel.params.len()];
    let tagged = inputs
        .iter()
        .map(|t| (Direction::Input, t))
        .chain(outputs.iter().map(|t| (Direction::Output, t)));
    for (i, (direction, tensor)) in tagged.enumerate() {
        let slot = &kernel.params[i];
        if !slot.is_tensor() || slot.direction != direction {
            return Err(KernelError::SlotKind {
                kernel: kernel.name.clone(),
                slot: i,
                expected: match direction {
                    Direction::Input => "input tensor",
                    Direction::Output => "output tensor",
                },
            });
        }
        if let Some(id) = tensor {
            params[i] = Param::Tensor(*id);
        }
    }
    Ok(params)
}
