mod message;

use proc_macro::TokenStream;

// ============================================================================
// #[derive(Message)]
// ============================================================================

/// Derive macro implementing `sourced_bus::Message` for a payload type.
///
/// The generated impl supplies the message name and namespace that make up
/// the message URN (`urn:message:{namespace}:{name}`). Both default from the
/// Rust type: the name is the type identifier and the namespace is the module
/// path with `::` replaced by `.`.
///
/// # Usage
///
/// ```ignore
/// #[derive(Serialize, Deserialize, Message)]
/// struct SubmitOrder {
///     order_id: String,
/// }
/// ```
///
/// With explicit naming:
/// ```ignore
/// #[derive(Serialize, Deserialize, Message)]
/// #[message(namespace = "Orders.Contracts", name = "SubmitOrder", entity = "orders:submit")]
/// struct SubmitOrder {
///     order_id: String,
/// }
/// ```
///
/// Additional URNs for polymorphic dispatch are listed with `also`; they are
/// appended after the primary URN in the envelope's `messageType` list:
/// ```ignore
/// #[derive(Serialize, Deserialize, Message)]
/// #[message(also = "urn:message:Orders.Contracts:OrderEvent")]
/// struct OrderSubmitted {
///     order_id: String,
/// }
/// ```
///
/// Supported attributes:
/// - `name = "..."`: message name (defaults to the type name)
/// - `namespace = "..."`: URN namespace (defaults to the dotted module path)
/// - `entity = "..."`: explicit exchange/topic name, bypassing the naming formatter
/// - `also = "urn:message:..."`: extra URN, repeatable
#[proc_macro_derive(Message, attributes(message))]
pub fn derive_message(input: TokenStream) -> TokenStream {
    message::derive_message(input)
}
