//! Entity declaration macro.
//!
//! `entity!` wraps an ordinary struct definition and generates its
//! [`Entity`](crate::models::Entity) implementation. Field order in the
//! generated metadata is the declaration order, and each field's storage
//! kind comes from its type's [`FieldType`](crate::models::FieldType) impl,
//! so unsupported field types are rejected at compile time.

/// Declare a struct and implement `Entity` for it.
///
/// # Example
///
/// ```
/// db_mapper::entity! {
///     #[derive(Debug, Clone, Default, PartialEq)]
///     pub struct Person {
///         pub id: Option<i64>,
///         pub name: String,
///         pub age: i64,
///     }
/// }
///
/// use db_mapper::models::Entity;
/// assert_eq!(Person::type_name(), "Person");
/// assert_eq!(Person::fields()[1].name, "name");
/// ```
///
/// Use `table = "name";` as the first item to override the naming convention:
///
/// ```
/// db_mapper::entity! {
///     table = "people";
///     #[derive(Debug, Default)]
///     pub struct Person {
///         pub id: Option<i64>,
///         pub name: String,
///     }
/// }
/// ```
#[macro_export]
macro_rules! entity {
    (
        @impl ($table:expr)
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $( $(#[$fmeta:meta])* $fvis:vis $field:ident : $ty:ty ),+
        }
    ) => {
        $(#[$meta])*
        $vis struct $name {
            $( $(#[$fmeta])* $fvis $field : $ty ),+
        }

        impl $crate::models::Entity for $name {
            fn type_name() -> &'static str {
                stringify!($name)
            }

            fn table_name() -> ::core::option::Option<&'static str> {
                $table
            }

            fn fields() -> ::std::vec::Vec<$crate::models::FieldDescriptor> {
                ::std::vec![
                    $(
                        $crate::models::FieldDescriptor::new(
                            stringify!($field),
                            <$ty as $crate::models::FieldType>::KIND,
                            <$ty as $crate::models::FieldType>::NULLABLE,
                        )
                    ),+
                ]
            }

            fn field_value(&self, field: &str) -> ::core::option::Option<$crate::models::Value> {
                $(
                    if field == stringify!($field) {
                        return ::core::option::Option::Some(
                            <$ty as $crate::models::FieldType>::to_value(&self.$field),
                        );
                    }
                )+
                ::core::option::Option::None
            }

            fn set_field(
                &mut self,
                field: &str,
                value: $crate::models::Value,
            ) -> ::core::result::Result<(), $crate::error::CoercionError> {
                $(
                    if field == stringify!($field) {
                        self.$field = <$ty as $crate::models::FieldType>::from_value(value)?;
                        return ::core::result::Result::Ok(());
                    }
                )+
                ::core::result::Result::Err($crate::error::CoercionError::new(
                    "declared field",
                    ::std::format!("unknown field '{}'", field),
                ))
            }
        }
    };

    (
        table = $table:literal;
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $( $(#[$fmeta:meta])* $fvis:vis $field:ident : $ty:ty ),+ $(,)?
        }
    ) => {
        $crate::entity! {
            @impl (::core::option::Option::Some($table))
            $(#[$meta])*
            $vis struct $name {
                $( $(#[$fmeta])* $fvis $field : $ty ),+
            }
        }
    };

    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $( $(#[$fmeta:meta])* $fvis:vis $field:ident : $ty:ty ),+ $(,)?
        }
    ) => {
        $crate::entity! {
            @impl (::core::option::Option::None)
            $(#[$meta])*
            $vis struct $name {
                $( $(#[$fmeta])* $fvis $field : $ty ),+
            }
        }
    };

}

pub use entity;
