/*!
Deobfuscators for proxy sources that hide addresses behind JavaScript.

These are small interpreters over a whitelisted grammar, not a script
engine: the classic `eval(function(p,a,c,k,e,d){...})` packer, the XOR
variable-table port encoding, and a string-expression evaluator for
`document.write(...)` payloads.
*/

pub mod crazyxor;
pub mod jsexpr;
pub mod packer;

pub use crazyxor::{decode_crazyxor, parse_crazyxor};
pub use jsexpr::deobfuscate_js;
pub use packer::unpack;
