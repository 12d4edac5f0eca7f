use super::value::Value;
use crate::ir::Register;

/// Register file: eight general registers plus the stack pointer.
///
/// General registers start as [`Value::Null`]; `rsp` starts at 0.
#[derive(Debug, Default)]
pub struct Registers {
    general: [Value; 8],
    pub rsp: i64,
}

impl Registers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a reference to the value in `reg`.
    pub fn get(&self, reg: Register) -> &Value {
        &self.general[reg.index()]
    }

    pub fn set(&mut self, reg: Register, value: Value) {
        self.general[reg.index()] = value;
    }

    /// The accumulator, `ra`.
    pub fn acc(&self) -> &Value {
        self.get(Register::Ra)
    }

    pub fn take_acc(&mut self) -> Value {
        std::mem::take(&mut self.general[Register::Ra.index()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_start_null() {
        let regs = Registers::new();
        for reg in Register::ALL {
            assert_eq!(regs.get(reg), &Value::Null);
        }
        assert_eq!(regs.rsp, 0);
    }

    #[test]
    fn set_replaces_value_and_tag() {
        let mut regs = Registers::new();
        regs.set(Register::Rc, Value::Int(4));
        regs.set(Register::Rc, Value::Str("four".into()));
        assert_eq!(regs.get(Register::Rc), &Value::Str("four".into()));
        assert_eq!(regs.get(Register::Rd), &Value::Null);
    }

    #[test]
    fn take_accumulator_leaves_null() {
        let mut regs = Registers::new();
        regs.set(Register::Ra, Value::Float(1.5));
        assert_eq!(regs.take_acc(), Value::Float(1.5));
        assert_eq!(regs.acc(), &Value::Null);
    }
}
