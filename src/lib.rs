/// The front end: lexer, parser and type checker, plus their error
/// types.
pub mod frontend;

/// AST and the type lattice shared by the parser, checker and generator.
pub mod lang;

/// Bytecode: instruction set, module/function builders, code generator.
pub mod bytecode;

/// The register VM, its values, heap and host-function environment.
pub mod runtime;
