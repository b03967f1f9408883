//! One adapter per class rewrite. Every adapter is idempotent: applying it to
//! a class it already changed reports no change.

mod add_field;
mod add_getter;
mod add_interface;
mod add_invoker;
mod add_methods;
mod add_setter;
mod applet_to_panel;
mod copy_method;
mod inject_callback;
mod replace_method;

pub use add_field::AddField;
pub use add_getter::{AddGetter, FieldAccess};
pub use add_interface::AddInterface;
pub use add_invoker::AddInvoker;
pub use add_methods::AddMethods;
pub use add_setter::AddSetter;
pub use applet_to_panel::AppletToPanel;
pub use copy_method::CopyMethod;
pub use inject_callback::{InjectCallback, InjectTarget, Placement};
pub use replace_method::ReplaceMethod;
