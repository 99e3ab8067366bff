//! Bytecode Generator
//!
//! Walks the AST and appends a byte-at-a-time instruction stream to the
//! state's shared bytecode buffer. Jump targets and counts that are not
//! known up front are emitted as placeholders and backpatched.
//!
//! Operand ordering: binary operators evaluate the right expression
//! first, then the left, so the left operand sits on top of the stack
//! when the operator opcode pops its inputs.

use crate::ast::{Node, Op};
use nominal_core::bytecode::{self, OpCode};
use nominal_core::Value;

/// Emitted for operators with no runtime meaning outside their context
/// (a stray `->` association); the VM reports it as an invalid opcode.
const INVALID_OPCODE: u8 = 0xFF;

/// Generate bytecode for a node, appending to `code`.
pub fn generate(node: &Node, code: &mut Vec<u8>) {
    match node {
        Node::Number(value) => {
            bytecode::emit_op(code, OpCode::Push);
            bytecode::emit_value(code, Value::number(*value));
        }

        Node::String(id) => {
            bytecode::emit_op(code, OpCode::Push);
            bytecode::emit_value(code, Value::interned(*id));
        }

        Node::Ident(id) => {
            bytecode::emit_op(code, OpCode::Fetch);
            bytecode::emit_u32(code, *id);
        }

        Node::Map(pairs) => {
            // Pairs are pushed in reverse so the first literal item is
            // popped (and inserted) first, preserving insertion order
            for (key, value) in pairs.iter().rev() {
                generate(value, code);
                generate(key, code);
            }
            bytecode::emit_op(code, OpCode::Map);
            bytecode::emit_u32(code, pairs.len() as u32);
        }

        Node::Unary { op, expr } => {
            generate(expr, code);
            emit_operator(code, *op);
        }

        Node::Index { expr, key, bracket } => {
            generate(expr, code);
            generate(key, code);
            bytecode::emit_op(code, if *bracket { OpCode::Get } else { OpCode::Find });
        }

        Node::Binary { op, left, right } => generate_binary(*op, left, right, code),

        Node::Sequence(items) => {
            for (position, item) in items.iter().enumerate() {
                generate(item, code);
                // Every expression but the last discards its result
                if position + 1 < items.len() {
                    bytecode::emit_op(code, OpCode::Pop);
                }
            }
        }

        Node::Function { params, body } => {
            // Jump over the inlined body; the target is known once the
            // body has been generated
            bytecode::emit_op(code, OpCode::Jump);
            let jump_at = code.len() as u32;
            bytecode::emit_u32(code, 0);

            let ip = code.len() as u32;
            generate(body, code);
            bytecode::emit_op(code, OpCode::Ret);

            let end = code.len() as u32;
            bytecode::patch_u32(code, jump_at, end);

            bytecode::emit_op(code, OpCode::Function);
            bytecode::emit_u32(code, ip);
            bytecode::emit_u32(code, params.len() as u32);
            for &param in params {
                bytecode::emit_u32(code, param);
            }
        }

        Node::Invocation { expr, args } => {
            for arg in args {
                generate(arg, code);
            }
            generate(expr, code);
            bytecode::emit_op(code, OpCode::Call);
            bytecode::emit_u32(code, args.len() as u32);
        }
    }
}

fn generate_binary(op: Op, left: &Node, right: &Node, code: &mut Vec<u8>) {
    match op {
        // Short-circuit: evaluate the left side, duplicate it as the
        // potential result, and jump past the right side when it already
        // decides the operation
        Op::And | Op::Or => {
            generate(left, code);

            bytecode::emit_op(code, OpCode::Dup);
            bytecode::emit_u32(code, 0);
            if op == Op::And {
                bytecode::emit_op(code, OpCode::Not);
            }
            bytecode::emit_op(code, OpCode::JumpIf);
            let jump_at = code.len() as u32;
            bytecode::emit_u32(code, 0);

            generate(right, code);
            emit_operator(code, op);

            let end = code.len() as u32;
            bytecode::patch_u32(code, jump_at, end);
        }

        Op::Define | Op::Assign => {
            generate(right, code);

            match left {
                // Defining or assigning a map entry
                Node::Index { expr, key, bracket } => {
                    generate(expr, code);
                    generate(key, code);

                    let entry_op = if op == Op::Assign {
                        if *bracket { OpCode::Set } else { OpCode::Update }
                    } else {
                        OpCode::Insert
                    };
                    bytecode::emit_op(code, entry_op);
                }

                // Defining or assigning a variable
                Node::Ident(id) => {
                    emit_operator(code, op);
                    bytecode::emit_u32(code, *id);
                }

                // The parser only lets identifiers and index expressions
                // through as the left side of ':=' / '='
                _ => unreachable!("invalid left side of {}", op.symbol()),
            }
        }

        _ => {
            generate(right, code);
            generate(left, code);
            emit_operator(code, op);
        }
    }
}

fn emit_operator(code: &mut Vec<u8>, op: Op) {
    match op {
        Op::Define => bytecode::emit_op(code, OpCode::Define),
        Op::Assign => bytecode::emit_op(code, OpCode::Assign),
        Op::Add => bytecode::emit_op(code, OpCode::Add),
        Op::Sub => bytecode::emit_op(code, OpCode::Sub),
        Op::Mul => bytecode::emit_op(code, OpCode::Mul),
        Op::Div => bytecode::emit_op(code, OpCode::Div),
        Op::Neg => bytecode::emit_op(code, OpCode::Neg),
        Op::Eq => bytecode::emit_op(code, OpCode::Eq),
        Op::Ne => bytecode::emit_op(code, OpCode::Ne),
        Op::Gt => bytecode::emit_op(code, OpCode::Gt),
        Op::Gte => bytecode::emit_op(code, OpCode::Gte),
        Op::Lt => bytecode::emit_op(code, OpCode::Lt),
        Op::Lte => bytecode::emit_op(code, OpCode::Lte),
        Op::And => bytecode::emit_op(code, OpCode::And),
        Op::Or => bytecode::emit_op(code, OpCode::Or),
        Op::Not => bytecode::emit_op(code, OpCode::Not),
        Op::Ret => bytecode::emit_op(code, OpCode::Ret),
        Op::Assoc => code.push(INVALID_OPCODE),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;
    use nominal_core::StringPool;

    fn compile(source: &str) -> (Vec<u8>, StringPool) {
        let mut pool = StringPool::default();
        let node = Parser::new(source, &mut pool).parse().unwrap();
        let mut code = Vec::new();
        generate(&node, &mut code);
        (code, pool)
    }

    fn read_op(code: &[u8], ip: &mut u32) -> OpCode {
        let op = OpCode::from_byte(code[*ip as usize]).expect("valid opcode");
        *ip += 1;
        op
    }

    #[test]
    fn test_number_pushes_value() {
        let (code, _) = compile("42");
        let mut ip = 0;
        assert_eq!(read_op(&code, &mut ip), OpCode::Push);
        assert_eq!(bytecode::read_value(&code, &mut ip).to_f64(), 42.0);
        assert_eq!(ip as usize, code.len());
    }

    #[test]
    fn test_binary_emits_right_then_left() {
        let (code, _) = compile("1 - 2");
        let mut ip = 0;
        assert_eq!(read_op(&code, &mut ip), OpCode::Push);
        assert_eq!(bytecode::read_value(&code, &mut ip).to_f64(), 2.0);
        assert_eq!(read_op(&code, &mut ip), OpCode::Push);
        assert_eq!(bytecode::read_value(&code, &mut ip).to_f64(), 1.0);
        assert_eq!(read_op(&code, &mut ip), OpCode::Sub);
    }

    #[test]
    fn test_define_emits_define_with_id() {
        let (code, mut pool) = compile("a := 1");
        let a = pool.intern("a");
        let mut ip = 0;
        assert_eq!(read_op(&code, &mut ip), OpCode::Push);
        bytecode::read_value(&code, &mut ip);
        assert_eq!(read_op(&code, &mut ip), OpCode::Define);
        assert_eq!(bytecode::read_u32(&code, &mut ip), a);
    }

    #[test]
    fn test_sequence_pops_between_expressions() {
        let (code, _) = compile("1, 2");
        let mut ip = 0;
        assert_eq!(read_op(&code, &mut ip), OpCode::Push);
        bytecode::read_value(&code, &mut ip);
        assert_eq!(read_op(&code, &mut ip), OpCode::Pop);
        assert_eq!(read_op(&code, &mut ip), OpCode::Push);
        bytecode::read_value(&code, &mut ip);
        assert_eq!(ip as usize, code.len());
    }

    #[test]
    fn test_map_literal_pushes_pairs_in_reverse() {
        let (code, _) = compile("{ 7, 8 }");
        let mut ip = 0;
        // Second pair first: value 8, key 1
        assert_eq!(read_op(&code, &mut ip), OpCode::Push);
        assert_eq!(bytecode::read_value(&code, &mut ip).to_f64(), 8.0);
        assert_eq!(read_op(&code, &mut ip), OpCode::Push);
        assert_eq!(bytecode::read_value(&code, &mut ip).to_f64(), 1.0);
        // First pair second: value 7, key 0
        assert_eq!(read_op(&code, &mut ip), OpCode::Push);
        assert_eq!(bytecode::read_value(&code, &mut ip).to_f64(), 7.0);
        assert_eq!(read_op(&code, &mut ip), OpCode::Push);
        assert_eq!(bytecode::read_value(&code, &mut ip).to_f64(), 0.0);
        assert_eq!(read_op(&code, &mut ip), OpCode::Map);
        assert_eq!(bytecode::read_u32(&code, &mut ip), 2);
    }

    #[test]
    fn test_dot_index_compiles_to_find() {
        let (code, _) = compile("m.a");
        assert_eq!(code[code.len() - 1], OpCode::Find as u8);
    }

    #[test]
    fn test_bracket_index_compiles_to_get() {
        let (code, _) = compile("m[0]");
        assert_eq!(code[code.len() - 1], OpCode::Get as u8);
    }

    #[test]
    fn test_entry_define_and_assign_opcodes() {
        let (code, _) = compile("m.a := 1");
        assert_eq!(code[code.len() - 1], OpCode::Insert as u8);

        let (code, _) = compile("m.a = 1");
        assert_eq!(code[code.len() - 1], OpCode::Update as u8);

        let (code, _) = compile("m[0] = 1");
        assert_eq!(code[code.len() - 1], OpCode::Set as u8);
    }

    #[test]
    fn test_function_body_is_skipped_by_jump() {
        let (code, _) = compile("[ 1 ]");
        let mut ip = 0;
        assert_eq!(read_op(&code, &mut ip), OpCode::Jump);
        let target = bytecode::read_u32(&code, &mut ip);
        let body_ip = ip;

        // The jump lands directly on the FUNCTION constructor
        assert_eq!(code[target as usize], OpCode::Function as u8);

        // And the constructor's ip operand points back at the body
        let mut at = target + 1;
        assert_eq!(bytecode::read_u32(&code, &mut at), body_ip);
        assert_eq!(bytecode::read_u32(&code, &mut at), 0); // paramcount
    }

    #[test]
    fn test_function_emits_parameter_ids() {
        let (code, mut pool) = compile("[ x y | x ]");
        let x = pool.intern("x");
        let y = pool.intern("y");

        let mut ip = 1;
        let target = bytecode::read_u32(&code, &mut ip);
        let mut at = target + 1;
        bytecode::read_u32(&code, &mut at); // body ip
        assert_eq!(bytecode::read_u32(&code, &mut at), 2);
        assert_eq!(bytecode::read_u32(&code, &mut at), x);
        assert_eq!(bytecode::read_u32(&code, &mut at), y);
    }

    #[test]
    fn test_invocation_pushes_args_then_callee() {
        let (code, mut pool) = compile("f: 1 2");
        let f = pool.intern("f");
        let mut ip = 0;
        assert_eq!(read_op(&code, &mut ip), OpCode::Push);
        assert_eq!(bytecode::read_value(&code, &mut ip).to_f64(), 1.0);
        assert_eq!(read_op(&code, &mut ip), OpCode::Push);
        assert_eq!(bytecode::read_value(&code, &mut ip).to_f64(), 2.0);
        assert_eq!(read_op(&code, &mut ip), OpCode::Fetch);
        assert_eq!(bytecode::read_u32(&code, &mut ip), f);
        assert_eq!(read_op(&code, &mut ip), OpCode::Call);
        assert_eq!(bytecode::read_u32(&code, &mut ip), 2);
    }

    #[test]
    fn test_short_circuit_and_shape() {
        let (code, _) = compile("a && b");
        let mut ip = 0;
        assert_eq!(read_op(&code, &mut ip), OpCode::Fetch);
        bytecode::read_u32(&code, &mut ip);
        assert_eq!(read_op(&code, &mut ip), OpCode::Dup);
        assert_eq!(bytecode::read_u32(&code, &mut ip), 0);
        assert_eq!(read_op(&code, &mut ip), OpCode::Not);
        assert_eq!(read_op(&code, &mut ip), OpCode::JumpIf);
        let target = bytecode::read_u32(&code, &mut ip);
        // The jump target is the end of the whole expression
        assert_eq!(target as usize, code.len());
        // The fall-through path evaluates b then applies AND
        assert_eq!(code[code.len() - 1], OpCode::And as u8);
    }

    #[test]
    fn test_short_circuit_or_has_no_not() {
        let (code, _) = compile("a || b");
        let mut ip = 0;
        assert_eq!(read_op(&code, &mut ip), OpCode::Fetch);
        bytecode::read_u32(&code, &mut ip);
        assert_eq!(read_op(&code, &mut ip), OpCode::Dup);
        bytecode::read_u32(&code, &mut ip);
        assert_eq!(read_op(&code, &mut ip), OpCode::JumpIf);
    }
}
