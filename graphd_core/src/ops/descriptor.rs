//! Static type and arity contract of one operator kind

use crate::error::{Direction, GraphError, GraphResult};
use crate::ops::dispatch::OpArgs;
use crate::tensor::{DataType, Tensor};

/// Set of element types accepted by one operator slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeSet {
    /// Matches every element type
    Any,
    /// Explicit members; the first one is the preferred type
    Only(Vec<DataType>),
}

impl TypeSet {
    pub fn any() -> Self {
        TypeSet::Any
    }

    pub fn floats() -> Self {
        TypeSet::Only(vec![DataType::Float32, DataType::Float64])
    }

    pub fn integers() -> Self {
        TypeSet::Only(vec![DataType::Int32, DataType::Int64])
    }

    pub fn numeric() -> Self {
        TypeSet::Only(vec![
            DataType::Float32,
            DataType::Float64,
            DataType::Int32,
            DataType::Int64,
        ])
    }

    pub fn of(types: &[DataType]) -> Self {
        TypeSet::Only(types.to_vec())
    }

    pub fn contains(&self, dtype: DataType) -> bool {
        match self {
            TypeSet::Any => true,
            TypeSet::Only(types) => types.contains(&dtype),
        }
    }

    /// Type chosen for an output when the reference input is not a member
    pub fn preferred(&self) -> Option<DataType> {
        match self {
            TypeSet::Any => None,
            TypeSet::Only(types) => types.first().copied(),
        }
    }
}

/// Arity, type and argument contract of an operator.
///
/// Built once with the `with_*` methods and [`OpDescriptor::build`], then
/// frozen inside an [`OpDef`](crate::ops::OpDef).
#[derive(Debug, Clone)]
pub struct OpDescriptor {
    name: String,
    min_inputs: usize,
    /// `None` means unbounded
    max_inputs: Option<usize>,
    num_outputs: usize,
    input_types: Vec<TypeSet>,
    default_input_types: TypeSet,
    output_types: Vec<TypeSet>,
    default_output_types: TypeSet,
    same_type: Option<usize>,
    accepts_t_args: bool,
    accepts_i_args: bool,
    accepts_b_args: bool,
    backward: Option<String>,
}

impl OpDescriptor {
    pub fn new(name: &str, min_inputs: usize, max_inputs: Option<usize>, num_outputs: usize) -> Self {
        Self {
            name: name.to_string(),
            min_inputs,
            max_inputs,
            num_outputs,
            input_types: Vec::new(),
            default_input_types: TypeSet::Any,
            output_types: Vec::new(),
            default_output_types: TypeSet::Any,
            same_type: None,
            accepts_t_args: false,
            accepts_i_args: false,
            accepts_b_args: false,
            backward: None,
        }
    }

    /// Exactly `inputs` inputs
    pub fn fixed(name: &str, inputs: usize, num_outputs: usize) -> Self {
        Self::new(name, inputs, Some(inputs), num_outputs)
    }

    /// Allowed types for every input slot without an explicit entry
    pub fn with_input_types(mut self, types: TypeSet) -> Self {
        self.default_input_types = types;
        self
    }

    pub fn with_input_slot(mut self, slot: usize, types: TypeSet) -> Self {
        if self.input_types.len() <= slot {
            self.input_types.resize(slot + 1, self.default_input_types.clone());
        }
        self.input_types[slot] = types;
        self
    }

    pub fn with_output_types(mut self, types: TypeSet) -> Self {
        self.default_output_types = types;
        self
    }

    pub fn with_output_slot(mut self, slot: usize, types: TypeSet) -> Self {
        if self.output_types.len() <= slot {
            self.output_types.resize(slot + 1, self.default_output_types.clone());
        }
        self.output_types[slot] = types;
        self
    }

    /// Force every output to the element type of input `slot`
    pub fn with_same_type(mut self, slot: usize) -> Self {
        self.same_type = Some(slot);
        self
    }

    pub fn with_t_args(mut self) -> Self {
        self.accepts_t_args = true;
        self
    }

    pub fn with_i_args(mut self) -> Self {
        self.accepts_i_args = true;
        self
    }

    pub fn with_b_args(mut self) -> Self {
        self.accepts_b_args = true;
        self
    }

    pub fn with_backward(mut self, op: &str) -> Self {
        self.backward = Some(op.to_string());
        self
    }

    /// Check the descriptor's own invariants
    pub fn build(self) -> GraphResult<Self> {
        if let Some(max) = self.max_inputs {
            if self.min_inputs > max {
                return Err(GraphError::config(format!(
                    "operator '{}': min_inputs {} exceeds max_inputs {}",
                    self.name, self.min_inputs, max
                )));
            }
        }
        if let Some(slot) = self.same_type {
            if slot >= self.min_inputs.max(1) {
                return Err(GraphError::config(format!(
                    "operator '{}': same-type reference slot {} is not a required input",
                    self.name, slot
                )));
            }
        }
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn min_inputs(&self) -> usize {
        self.min_inputs
    }

    pub fn max_inputs(&self) -> Option<usize> {
        self.max_inputs
    }

    pub fn num_outputs(&self) -> usize {
        self.num_outputs
    }

    pub fn same_type(&self) -> Option<usize> {
        self.same_type
    }

    pub fn backward(&self) -> Option<&str> {
        self.backward.as_deref()
    }

    pub fn input_types(&self, slot: usize) -> &TypeSet {
        self.input_types.get(slot).unwrap_or(&self.default_input_types)
    }

    pub fn output_types(&self, slot: usize) -> &TypeSet {
        self.output_types.get(slot).unwrap_or(&self.default_output_types)
    }

    pub fn check_arity(&self, actual: usize) -> GraphResult<()> {
        let too_many = self.max_inputs.map_or(false, |max| actual > max);
        if actual < self.min_inputs || too_many {
            return Err(GraphError::Arity {
                op: self.name.clone(),
                node: None,
                min: self.min_inputs,
                max: self.max_inputs,
                actual,
            });
        }
        Ok(())
    }

    pub fn check_args(&self, args: &OpArgs) -> GraphResult<()> {
        let rejected = [
            (!self.accepts_t_args && !args.t_args.is_empty(), "floating-point"),
            (!self.accepts_i_args && !args.i_args.is_empty(), "integer"),
            (!self.accepts_b_args && !args.b_args.is_empty(), "boolean"),
        ];
        if let Some((_, kind)) = rejected.iter().find(|(bad, _)| *bad) {
            return Err(GraphError::invalid_argument(format!(
                "operator '{}' takes no {} arguments",
                self.name, kind
            )));
        }
        Ok(())
    }

    pub fn check_input_types(&self, inputs: &[&Tensor]) -> GraphResult<()> {
        for (slot, tensor) in inputs.iter().enumerate() {
            if !self.input_types(slot).contains(tensor.dtype()) {
                return Err(GraphError::TypeMismatch {
                    op: self.name.clone(),
                    node: None,
                    direction: Direction::Input,
                    slot,
                    dtype: tensor.dtype(),
                });
            }
        }
        Ok(())
    }

    /// Element type of every output slot for these inputs
    pub fn resolve_output_types(&self, inputs: &[&Tensor]) -> GraphResult<Vec<DataType>> {
        if let Some(slot) = self.same_type {
            let dtype = inputs.get(slot).map(|t| t.dtype()).ok_or_else(|| GraphError::Arity {
                op: self.name.clone(),
                node: None,
                min: slot + 1,
                max: self.max_inputs,
                actual: inputs.len(),
            })?;
            return Ok(vec![dtype; self.num_outputs]);
        }

        let reference = inputs.first().map(|t| t.dtype());
        (0..self.num_outputs)
            .map(|slot| {
                let allowed = self.output_types(slot);
                let chosen = match reference {
                    Some(dtype) if allowed.contains(dtype) => Some(dtype),
                    _ => allowed.preferred(),
                };
                match (chosen, reference) {
                    (Some(dtype), _) if allowed.contains(dtype) => Ok(dtype),
                    (_, Some(dtype)) => Err(GraphError::TypeMismatch {
                        op: self.name.clone(),
                        node: None,
                        direction: Direction::Output,
                        slot,
                        dtype,
                    }),
                    (_, None) => Err(GraphError::invalid_argument(format!(
                        "{}: output {} has no input to take its type from and no preferred type",
                        self.name, slot
                    ))),
                }
            })
            .collect()
    }
}
