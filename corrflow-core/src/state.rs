//! Workflow state sets.
//!
//! A workflow's states are a closed enumeration chosen by the author. The
//! engine is generic over that enumeration; only the dispatcher converts to
//! and from the integer ordinal that is actually persisted.

use std::fmt::Debug;
use std::hash::Hash;

/// A member of a workflow's finite state set.
pub trait WorkflowState: Copy + Eq + Hash + Debug + Send + Sync + 'static {
    /// Ordinal stored in the instance row.
    fn ordinal(self) -> i32;

    /// Maps a stored ordinal back to a member, if it is one.
    fn from_ordinal(ordinal: i32) -> Option<Self>;

    /// Symbolic name, for logs and error messages.
    fn name(self) -> &'static str;
}

/// Declares a state enumeration with explicit ordinals and implements
/// [`WorkflowState`] for it.
///
/// ```
/// corrflow_core::workflow_state! {
///     pub enum OrderState {
///         Submitted = 0,
///         Paid = 1,
///         Shipped = 2,
///     }
/// }
///
/// use corrflow_core::WorkflowState;
/// assert_eq!(OrderState::Paid.ordinal(), 1);
/// assert_eq!(OrderState::from_ordinal(2), Some(OrderState::Shipped));
/// ```
///
/// Ordinals must be distinct:
///
/// ```compile_fail
/// corrflow_core::workflow_state! {
///     enum Clash {
///         Open = 1,
///         Closed = 1,
///     }
/// }
/// ```
#[macro_export]
macro_rules! workflow_state {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $($variant:ident = $ordinal:expr),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(i32)]
        $vis enum $name {
            $($variant = $ordinal),+
        }

        impl $crate::WorkflowState for $name {
            fn ordinal(self) -> i32 {
                self as i32
            }

            fn from_ordinal(ordinal: i32) -> Option<Self> {
                $(
                    if ordinal == $name::$variant as i32 {
                        return Some($name::$variant);
                    }
                )+
                None
            }

            fn name(self) -> &'static str {
                match self {
                    $($name::$variant => stringify!($variant)),+
                }
            }
        }
    };
}
