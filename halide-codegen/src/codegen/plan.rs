//! Codegen plan IR
//!
//! Three core concepts:
//! 1. **LeafValue**: class-level storage for parameters and constants, with accessors
//! 2. **InputBinding / OutputBinding**: pipeline signature, immediate or recurrent
//! 3. **Stmt**: pipeline-construction statements, referencing symbols by name
//!
//! Produced by `lower()`, consumed by a `Backend`. Nothing here knows target syntax.

/// Element type as spelled by the runtime library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CType {
    Float,
    Double,
    Int8,
    Int16,
}

/// Index-variable scheme for pointwise definitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexVars {
    One,
    Two,
}

/// Complete codegen plan for one evaluator class.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluatorPlan {
    pub namespace: String,
    pub class_name: String,
    pub values: Vec<LeafValue>,
    /// Immediate inputs sorted by name, then recurrent inputs sorted by name.
    pub inputs: Vec<InputBinding>,
    /// Immediate outputs sorted by name, then recurrent outputs sorted by name.
    pub outputs: Vec<OutputBinding>,
    pub body: Vec<Stmt>,
}

impl EvaluatorPlan {
    pub fn immediate_inputs(&self) -> impl Iterator<Item = &InputBinding> {
        self.inputs.iter().filter(|i| i.recurrence.is_none())
    }

    pub fn recurrent_inputs(&self) -> impl Iterator<Item = (&InputBinding, &RecurrentSlot)> {
        self.inputs
            .iter()
            .filter_map(|i| i.recurrence.as_ref().map(|slot| (i, slot)))
    }

    pub fn immediate_outputs(&self) -> impl Iterator<Item = &OutputBinding> {
        self.outputs.iter().filter(|o| o.feeds.is_none())
    }

    pub fn has_recurrence(&self) -> bool {
        self.inputs.iter().any(|i| i.recurrence.is_some())
    }

    pub fn input(&self, name: &str) -> Option<&InputBinding> {
        self.inputs.iter().find(|i| i.name == name)
    }
}

// ─── (1) Leaf values ────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct LeafValue {
    /// Key in the weight store.
    pub uid: String,
    pub symbol: String,
    /// Element type the writer accepts.
    pub source: CType,
    pub storage: LeafStorage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafStorage {
    Plain,
    /// Stored as integers of `storage` width plus a scale step of the source type.
    Quantized { storage: CType, reserved_bits: u32 },
}

impl LeafValue {
    pub fn storage_type(&self) -> CType {
        match self.storage {
            LeafStorage::Plain => self.source,
            LeafStorage::Quantized { storage, .. } => storage,
        }
    }
}

// ─── (2) Signature ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct InputBinding {
    pub name: String,
    pub uid: String,
    pub elem: CType,
    pub recurrence: Option<RecurrentSlot>,
}

/// History buffer backing a recurrent input.
#[derive(Debug, Clone, PartialEq)]
pub struct RecurrentSlot {
    pub offset: usize,
    /// Buffer dimensions in runtime order.
    pub dims: Vec<usize>,
}

impl RecurrentSlot {
    pub fn len(&self) -> usize {
        self.offset + 1
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputBinding {
    pub name: String,
    pub uid: String,
    /// Symbol of the expression realized into this output.
    pub value: String,
    pub elem: CType,
    /// Name of the recurrent input this output writes back into.
    pub feeds: Option<String>,
}

// ─── (3) Statements ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// Typed view over a storage member.
    BufferView {
        name: String,
        elem: CType,
        storage: String,
        dims: Vec<usize>,
        label: String,
    },
    /// Named pipeline stage.
    Func { name: String, def: FuncDef },
    /// Dequantized view + scale step grouped under one symbol.
    FuncPair { name: String, members: [String; 2] },
    /// Group of stages produced by a single call.
    FuncGroup { name: String, value: Expr },
    /// Materialize once, reuse at every consumer.
    ComputeRoot { func: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum FuncDef {
    /// `f(vars) = buffer(vars)`
    Indexed { vars: IndexVars, buffer: String },
    /// `f() = member`
    Scalar { member: String },
    /// `f = expr`
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Ref(String),
    Int(i64),
    Call { callee: Callee, args: Vec<Expr> },
}

impl Expr {
    pub fn call(callee: Callee, args: Vec<Expr>) -> Self {
        Expr::Call { callee, args }
    }

    pub fn int(value: usize) -> Self {
        Expr::Int(value as i64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Callee {
    Plus,
    Minus,
    ElementTimes,
    Log,
    Tanh,
    Sigmoid(CType),
    VectorByMatrixTimes,
    VectorByMatrixTimesQuantized,
    Slice,
    Splice,
    Quantize { from: CType, to: CType },
}
