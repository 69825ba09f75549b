use super::{hash_map, opcode_bits, run_test, set_in_state, ExpectedState, ALL_REGISTERS};

#[test]
fn load_register_immediate() {
    for register in ALL_REGISTERS {
        // LD <R>, 0x45
        let program = format!("{:02x}45", 0x06 | (opcode_bits(register) << 3));

        let mut expected_state = ExpectedState::empty();
        set_in_state(&mut expected_state, register, 0x45);
        run_test(&program, &expected_state);
    }
}

#[test]
fn load_register_register() {
    for r1 in ALL_REGISTERS {
        // LD <R1>, 0x45
        let ldri = format!("{:02x}45", 0x06 | (opcode_bits(r1) << 3));

        for r2 in ALL_REGISTERS {
            // LD <R2>, <R1>
            let opcode = 0x40 | (opcode_bits(r2) << 3) | opcode_bits(r1);
            let program_hex = format!("{ldri}{opcode:02x}");

            let mut expected_state = ExpectedState::empty();
            set_in_state(&mut expected_state, r2, 0x45);

            run_test(&program_hex, &expected_state);
        }
    }
}

#[test]
fn load_register_immediate_16() {
    run_test(
        // LD BC, 0x2468
        "016824",
        &ExpectedState { b: Some(0x24), c: Some(0x68), ..ExpectedState::empty() },
    );

    run_test(
        // LD DE, 0x1357
        "115713",
        &ExpectedState { d: Some(0x13), e: Some(0x57), ..ExpectedState::empty() },
    );

    run_test(
        // LD HL, 0xABCD
        "21CDAB",
        &ExpectedState { h: Some(0xAB), l: Some(0xCD), ..ExpectedState::empty() },
    );

    run_test(
        // LD SP, 0x8FE9
        "31E98F",
        &ExpectedState { sp: Some(0x8FE9), ..ExpectedState::empty() },
    );
}

#[test]
fn load_indirect_hl() {
    run_test(
        // LD HL, 0xC105 / LD (HL), 0x83
        "2105C13683",
        &ExpectedState { memory: hash_map! { 0xC105: 0x83 }, ..ExpectedState::empty() },
    );

    run_test(
        // LD HL, 0xC105 / LD (HL), 0x77 / LD B, (HL)
        "2105C1367746",
        &ExpectedState { b: Some(0x77), ..ExpectedState::empty() },
    );

    run_test(
        // LD B, 0x66 / LD HL, 0xC105 / LD (HL), B
        "06662105C170",
        &ExpectedState { memory: hash_map! { 0xC105: 0x66 }, ..ExpectedState::empty() },
    );
}

#[test]
fn load_indirect_hl_inc_dec() {
    run_test(
        // LD HL, 0xC200 / LD A, 0x91 / LD (HL+), A
        "2100C23E9122",
        &ExpectedState {
            h: Some(0xC2),
            l: Some(0x01),
            memory: hash_map! { 0xC200: 0x91 },
            ..ExpectedState::empty()
        },
    );

    run_test(
        // LD HL, 0xC200 / LD A, 0x91 / LD (HL-), A
        "2100C23E9132",
        &ExpectedState {
            h: Some(0xC1),
            l: Some(0xFF),
            memory: hash_map! { 0xC200: 0x91 },
            ..ExpectedState::empty()
        },
    );

    run_test(
        // LD HL, 0xC200 / LD (HL), 0x2C / LD A, (HL+)
        "2100C2362C2A",
        &ExpectedState { a: Some(0x2C), h: Some(0xC2), l: Some(0x01), ..ExpectedState::empty() },
    );
}

#[test]
fn load_indirect_bc_de() {
    run_test(
        // LD BC, 0xC300 / LD A, 0x18 / LD (BC), A
        "0100C33E1802",
        &ExpectedState { memory: hash_map! { 0xC300: 0x18 }, ..ExpectedState::empty() },
    );

    run_test(
        // LD DE, 0xC301 / LD A, 0x29 / LD (DE), A / LD A, 0x00 / LD A, (DE)
        "1101C33E29123E001A",
        &ExpectedState { a: Some(0x29), ..ExpectedState::empty() },
    );
}

#[test]
fn load_direct() {
    run_test(
        // LD A, 0x4F / LD (0xC555), A
        "3E4FEA55C5",
        &ExpectedState { memory: hash_map! { 0xC555: 0x4F }, ..ExpectedState::empty() },
    );

    run_test(
        // LD A, 0x4F / LD (0xC555), A / LD A, 0x00 / LD A, (0xC555)
        "3E4FEA55C53E00FA55C5",
        &ExpectedState { a: Some(0x4F), ..ExpectedState::empty() },
    );
}

#[test]
fn load_high_page() {
    run_test(
        // LD A, 0x9A / LDH (0x80), A
        "3E9AE080",
        &ExpectedState { memory: hash_map! { 0xFF80: 0x9A }, ..ExpectedState::empty() },
    );

    run_test(
        // LD A, 0x9A / LDH (0x80), A / LD A, 0x00 / LDH A, (0x80)
        "3E9AE0803E00F080",
        &ExpectedState { a: Some(0x9A), ..ExpectedState::empty() },
    );

    run_test(
        // LD C, 0x81 / LD A, 0x67 / LD (0xFF00+C), A
        "0E813E67E2",
        &ExpectedState { memory: hash_map! { 0xFF81: 0x67 }, ..ExpectedState::empty() },
    );

    run_test(
        // LD C, 0x81 / LD A, 0x67 / LD (0xFF00+C), A / LD A, 0x00 / LD A, (0xFF00+C)
        "0E813E67E23E00F2",
        &ExpectedState { a: Some(0x67), ..ExpectedState::empty() },
    );
}

#[test]
fn push_and_pop() {
    run_test(
        // LD SP, 0xDFFF / LD BC, 0x1234 / PUSH BC / POP DE
        "31FFDF013412C5D1",
        &ExpectedState {
            d: Some(0x12),
            e: Some(0x34),
            sp: Some(0xDFFF),
            ..ExpectedState::empty()
        },
    );

    run_test(
        // LD SP, 0xDFFF / LD HL, 0x5678 / PUSH HL
        "31FFDF217856E5",
        &ExpectedState {
            sp: Some(0xDFFD),
            memory: hash_map! { 0xDFFD: 0x78, 0xDFFE: 0x56 },
            ..ExpectedState::empty()
        },
    );

    // POP AF masks the low flag bits
    run_test(
        // LD SP, 0xDFFF / LD BC, 0x12FF / PUSH BC / POP AF
        "31FFDF01FF12C5F1",
        &ExpectedState { a: Some(0x12), f: Some(0xF0), ..ExpectedState::empty() },
    );
}

#[test]
fn load_stack_pointer() {
    run_test(
        // LD HL, 0x9ABC / LD SP, HL
        "21BC9AF9",
        &ExpectedState { sp: Some(0x9ABC), ..ExpectedState::empty() },
    );

    run_test(
        // LD SP, 0xFFF8 / LD (0xC100), SP
        "31F8FF0800C1",
        &ExpectedState {
            memory: hash_map! { 0xC100: 0xF8, 0xC101: 0xFF },
            ..ExpectedState::empty()
        },
    );

    run_test(
        // LD SP, 0xC0FF / LDHL SP, 1
        "31FFC0F801",
        &ExpectedState { h: Some(0xC1), l: Some(0x00), f: Some(0x30), ..ExpectedState::empty() },
    );
}
