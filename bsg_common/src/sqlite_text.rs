/// Stores a type in a SQLite `TEXT` column using its `Display` and `FromStr` implementations.
///
/// SQLite has no native decimal or 256-bit types, so money amounts, hashes and wallet addresses are all persisted as
/// their canonical string forms. The type's `Display` output must round-trip through its `FromStr` implementation.
#[macro_export]
macro_rules! sqlite_text_type {
    ($t:ty) => {
        impl ::sqlx::Type<::sqlx::Sqlite> for $t {
            fn type_info() -> ::sqlx::sqlite::SqliteTypeInfo {
                <String as ::sqlx::Type<::sqlx::Sqlite>>::type_info()
            }

            fn compatible(ty: &::sqlx::sqlite::SqliteTypeInfo) -> bool {
                <String as ::sqlx::Type<::sqlx::Sqlite>>::compatible(ty)
            }
        }

        impl<'q> ::sqlx::Encode<'q, ::sqlx::Sqlite> for $t {
            fn encode_by_ref(
                &self,
                buf: &mut Vec<::sqlx::sqlite::SqliteArgumentValue<'q>>,
            ) -> ::sqlx::encode::IsNull {
                <String as ::sqlx::Encode<'q, ::sqlx::Sqlite>>::encode(self.to_string(), buf)
            }
        }

        impl<'r> ::sqlx::Decode<'r, ::sqlx::Sqlite> for $t {
            fn decode(value: ::sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, ::sqlx::error::BoxDynError> {
                let s = <String as ::sqlx::Decode<'r, ::sqlx::Sqlite>>::decode(value)?;
                let v = s.parse::<$t>().map_err(|e| format!("Invalid stored value '{s}': {e}"))?;
                Ok(v)
            }
        }
    };
}
