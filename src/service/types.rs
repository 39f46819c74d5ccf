//! Message types of the echo service.
//!
//! Enums are `i32` newtypes rather than Rust enums: a peer may send a code
//! this schema does not declare, and the echo must hand it back unchanged.

use crate::error::{ProtocolError, ProtocolResult};
use crate::protocols::{
    wire_size, FieldIdentifier, InputProtocol, ListIdentifier, MapIdentifier, OutputProtocol,
    StructIdentifier, TType, WireStruct,
};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Upper bound on up-front allocation for a decoded container.
const PREALLOC_LIMIT: usize = 1024;

macro_rules! thrift_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $($variant:ident = $code:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub i32);

        #[allow(non_upper_case_globals)]
        impl $name {
            $(pub const $variant: $name = $name($code);)+

            /// Every declared value, in declaration order.
            pub const VALUES: &'static [$name] = &[$($name::$variant),+];

            /// Symbolic name, if the code is declared.
            pub fn name(self) -> Option<&'static str> {
                match self.0 {
                    $($code => Some(stringify!($variant)),)+
                    _ => None,
                }
            }
        }

        impl From<i32> for $name {
            fn from(code: i32) -> Self {
                $name(code)
            }
        }

        impl From<$name> for i32 {
            fn from(value: $name) -> i32 {
                value.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self.name() {
                    Some(name) => f.write_str(name),
                    None => write!(f, "{}", self.0),
                }
            }
        }
    };
}

thrift_enum! {
    /// Values with implicit codes starting at zero.
    UndefinedValues { One = 0, Two = 1, Three = 2 }
}

thrift_enum! {
    /// Values with explicit codes starting at one.
    DefinedValues { One = 1, Two = 2, Three = 3 }
}

thrift_enum! {
    /// Mixed implicit and explicit codes.
    HeterogeneousValues { One = 0, Two = 2, Three = 3 }
}

thrift_enum! {
    Status { ACTIVE = 1, INACTIVE = 2 }
}

const CONTAINER_FIELDS: &[(i16, &str)] = &[
    (1, "first"),
    (2, "second"),
    (3, "third"),
    (4, "optionalFourth"),
    (5, "optionalFifth"),
    (6, "optionalSixth"),
    (7, "defaultSeventh"),
    (8, "defaultEighth"),
    (9, "defaultNineth"),
    (10, "status"),
    (11, "undefinedList"),
    (12, "definedSet"),
    (13, "heterogeneousMap"),
];

/// The struct carried by every `echo` call.
///
/// Unset fields are `None` and are left off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerOfEnums {
    pub first: Option<UndefinedValues>,
    pub second: Option<DefinedValues>,
    pub third: Option<HeterogeneousValues>,
    pub optional_fourth: Option<UndefinedValues>,
    pub optional_fifth: Option<DefinedValues>,
    pub optional_sixth: Option<HeterogeneousValues>,
    pub default_seventh: Option<UndefinedValues>,
    pub default_eighth: Option<DefinedValues>,
    pub default_nineth: Option<HeterogeneousValues>,
    pub status: Option<Vec<Status>>,
    pub undefined_list: Option<Vec<UndefinedValues>>,
    pub defined_set: Option<BTreeSet<DefinedValues>>,
    pub heterogeneous_map: Option<BTreeMap<HeterogeneousValues, DefinedValues>>,
}

impl Default for ContainerOfEnums {
    fn default() -> Self {
        Self {
            default_seventh: Some(UndefinedValues::One),
            default_eighth: Some(DefinedValues::One),
            default_nineth: Some(HeterogeneousValues::One),
            ..Self::empty()
        }
    }
}

impl ContainerOfEnums {
    /// A value with no field set, not even the defaulted ones.
    pub fn empty() -> Self {
        Self {
            first: None,
            second: None,
            third: None,
            optional_fourth: None,
            optional_fifth: None,
            optional_sixth: None,
            default_seventh: None,
            default_eighth: None,
            default_nineth: None,
            status: None,
            undefined_list: None,
            defined_set: None,
            heterogeneous_map: None,
        }
    }
}

impl WireStruct for ContainerOfEnums {
    fn read(input: &mut dyn InputProtocol) -> ProtocolResult<Self> {
        let mut value = Self::empty();

        input.read_struct_begin()?;
        loop {
            let field = input.read_field_begin()?;
            if field.field_type == TType::Stop {
                break;
            }
            let enum_field = field.carries(TType::I32);
            match field.resolve_id(CONTAINER_FIELDS) {
                Some(1) if enum_field => value.first = Some(read_enum(input)?),
                Some(2) if enum_field => value.second = Some(read_enum(input)?),
                Some(3) if enum_field => value.third = Some(read_enum(input)?),
                Some(4) if enum_field => value.optional_fourth = Some(read_enum(input)?),
                Some(5) if enum_field => value.optional_fifth = Some(read_enum(input)?),
                Some(6) if enum_field => value.optional_sixth = Some(read_enum(input)?),
                Some(7) if enum_field => value.default_seventh = Some(read_enum(input)?),
                Some(8) if enum_field => value.default_eighth = Some(read_enum(input)?),
                Some(9) if enum_field => value.default_nineth = Some(read_enum(input)?),
                Some(10) if field.carries(TType::List) => {
                    value.status = Some(read_enum_list(input)?);
                }
                Some(11) if field.carries(TType::List) => {
                    value.undefined_list = Some(read_enum_list(input)?);
                }
                Some(12) if field.carries(TType::Set) => {
                    value.defined_set = Some(read_enum_set(input)?);
                }
                Some(13) if field.carries(TType::Map) => {
                    value.heterogeneous_map = Some(read_enum_map(input)?);
                }
                _ => input.skip(field.field_type)?,
            }
            input.read_field_end()?;
        }
        input.read_struct_end()?;

        Ok(value)
    }

    fn write(&self, output: &mut dyn OutputProtocol) -> ProtocolResult<()> {
        output.write_struct_begin(&StructIdentifier::new("ContainerOfEnums"))?;
        write_enum_field(output, "first", 1, self.first)?;
        write_enum_field(output, "second", 2, self.second)?;
        write_enum_field(output, "third", 3, self.third)?;
        write_enum_field(output, "optionalFourth", 4, self.optional_fourth)?;
        write_enum_field(output, "optionalFifth", 5, self.optional_fifth)?;
        write_enum_field(output, "optionalSixth", 6, self.optional_sixth)?;
        write_enum_field(output, "defaultSeventh", 7, self.default_seventh)?;
        write_enum_field(output, "defaultEighth", 8, self.default_eighth)?;
        write_enum_field(output, "defaultNineth", 9, self.default_nineth)?;

        if let Some(status) = &self.status {
            output.write_field_begin(&FieldIdentifier::new("status", TType::List, 10))?;
            write_enum_list(output, status)?;
            output.write_field_end()?;
        }
        if let Some(undefined_list) = &self.undefined_list {
            output.write_field_begin(&FieldIdentifier::new("undefinedList", TType::List, 11))?;
            write_enum_list(output, undefined_list)?;
            output.write_field_end()?;
        }
        if let Some(defined_set) = &self.defined_set {
            output.write_field_begin(&FieldIdentifier::new("definedSet", TType::Set, 12))?;
            output.write_set_begin(&ListIdentifier::new(TType::I32, wire_size(defined_set.len())?))?;
            for item in defined_set {
                output.write_i32(item.0)?;
            }
            output.write_set_end()?;
            output.write_field_end()?;
        }
        if let Some(map) = &self.heterogeneous_map {
            output.write_field_begin(&FieldIdentifier::new("heterogeneousMap", TType::Map, 13))?;
            output.write_map_begin(&MapIdentifier::new(
                TType::I32,
                TType::I32,
                wire_size(map.len())?,
            ))?;
            for (key, value) in map {
                output.write_i32(key.0)?;
                output.write_i32(value.0)?;
            }
            output.write_map_end()?;
            output.write_field_end()?;
        }

        output.write_field_stop()?;
        output.write_struct_end()
    }
}

impl fmt::Display for ContainerOfEnums {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut fields = Vec::new();
        push_scalar(&mut fields, "first", self.first);
        push_scalar(&mut fields, "second", self.second);
        push_scalar(&mut fields, "third", self.third);
        push_scalar(&mut fields, "optionalFourth", self.optional_fourth);
        push_scalar(&mut fields, "optionalFifth", self.optional_fifth);
        push_scalar(&mut fields, "optionalSixth", self.optional_sixth);
        push_scalar(&mut fields, "defaultSeventh", self.default_seventh);
        push_scalar(&mut fields, "defaultEighth", self.default_eighth);
        push_scalar(&mut fields, "defaultNineth", self.default_nineth);
        if let Some(status) = &self.status {
            fields.push(format!("status=[{}]", join(status)));
        }
        if let Some(undefined_list) = &self.undefined_list {
            fields.push(format!("undefinedList=[{}]", join(undefined_list)));
        }
        if let Some(defined_set) = &self.defined_set {
            fields.push(format!("definedSet={{{}}}", join(defined_set)));
        }
        if let Some(map) = &self.heterogeneous_map {
            let entries: Vec<String> = map.iter().map(|(k, v)| format!("{k}: {v}")).collect();
            fields.push(format!("heterogeneousMap={{{}}}", entries.join(", ")));
        }
        write!(f, "ContainerOfEnums({})", fields.join(", "))
    }
}

fn push_scalar<T: fmt::Display>(fields: &mut Vec<String>, name: &str, value: Option<T>) {
    if let Some(value) = value {
        fields.push(format!("{name}={value}"));
    }
}

fn join<'a, T: fmt::Display + 'a>(items: impl IntoIterator<Item = &'a T>) -> String {
    items
        .into_iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn read_enum<T: From<i32>>(input: &mut dyn InputProtocol) -> ProtocolResult<T> {
    input.read_i32().map(T::from)
}

fn write_enum_field<T: Into<i32>>(
    output: &mut dyn OutputProtocol,
    name: &str,
    id: i16,
    value: Option<T>,
) -> ProtocolResult<()> {
    if let Some(value) = value {
        output.write_field_begin(&FieldIdentifier::new(name, TType::I32, id))?;
        output.write_i32(value.into())?;
        output.write_field_end()?;
    }
    Ok(())
}

fn write_enum_list<T: Copy + Into<i32>>(
    output: &mut dyn OutputProtocol,
    items: &[T],
) -> ProtocolResult<()> {
    output.write_list_begin(&ListIdentifier::new(TType::I32, wire_size(items.len())?))?;
    for item in items {
        output.write_i32((*item).into())?;
    }
    output.write_list_end()
}

/// Enum containers hold `i32` elements. Empty containers may carry any
/// element type, and untyped protocols report `Void`.
fn check_elements(element_type: TType, size: i32) -> ProtocolResult<()> {
    if size == 0 || matches!(element_type, TType::I32 | TType::Void) {
        Ok(())
    } else {
        Err(ProtocolError::invalid(format!(
            "expected i32 elements, found {element_type:?}"
        )))
    }
}

fn prealloc(size: i32) -> usize {
    usize::try_from(size).unwrap_or(0).min(PREALLOC_LIMIT)
}

fn read_enum_list<T: From<i32>>(input: &mut dyn InputProtocol) -> ProtocolResult<Vec<T>> {
    let list = input.read_list_begin()?;
    check_elements(list.element_type, list.size)?;
    let mut items = Vec::with_capacity(prealloc(list.size));
    for _ in 0..list.size {
        items.push(read_enum(input)?);
    }
    input.read_list_end()?;
    Ok(items)
}

fn read_enum_set<T: From<i32> + Ord>(input: &mut dyn InputProtocol) -> ProtocolResult<BTreeSet<T>> {
    let set = input.read_set_begin()?;
    check_elements(set.element_type, set.size)?;
    let mut items = BTreeSet::new();
    for _ in 0..set.size {
        items.insert(read_enum(input)?);
    }
    input.read_set_end()?;
    Ok(items)
}

fn read_enum_map<K, V>(input: &mut dyn InputProtocol) -> ProtocolResult<BTreeMap<K, V>>
where
    K: From<i32> + Ord,
    V: From<i32>,
{
    let map = input.read_map_begin()?;
    check_elements(map.key_type, map.size)?;
    check_elements(map.value_type, map.size)?;
    let mut entries = BTreeMap::new();
    for _ in 0..map.size {
        let key = read_enum(input)?;
        let value = read_enum(input)?;
        entries.insert(key, value);
    }
    input.read_map_end()?;
    Ok(entries)
}

/// Argument struct of `echo`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EchoArgs {
    pub message: Option<ContainerOfEnums>,
}

impl WireStruct for EchoArgs {
    fn read(input: &mut dyn InputProtocol) -> ProtocolResult<Self> {
        let mut args = EchoArgs::default();
        input.read_struct_begin()?;
        loop {
            let field = input.read_field_begin()?;
            if field.field_type == TType::Stop {
                break;
            }
            match field.resolve_id(&[(1, "message")]) {
                Some(1) if field.carries(TType::Struct) => {
                    args.message = Some(ContainerOfEnums::read(input)?);
                }
                _ => input.skip(field.field_type)?,
            }
            input.read_field_end()?;
        }
        input.read_struct_end()?;
        Ok(args)
    }

    fn write(&self, output: &mut dyn OutputProtocol) -> ProtocolResult<()> {
        output.write_struct_begin(&StructIdentifier::new("echo_args"))?;
        if let Some(message) = &self.message {
            output.write_field_begin(&FieldIdentifier::new("message", TType::Struct, 1))?;
            message.write(output)?;
            output.write_field_end()?;
        }
        output.write_field_stop()?;
        output.write_struct_end()
    }
}

/// Result struct of `echo`. Field 0 holds the return value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EchoResult {
    pub success: Option<ContainerOfEnums>,
}

impl WireStruct for EchoResult {
    fn read(input: &mut dyn InputProtocol) -> ProtocolResult<Self> {
        let mut result = EchoResult::default();
        input.read_struct_begin()?;
        loop {
            let field = input.read_field_begin()?;
            if field.field_type == TType::Stop {
                break;
            }
            match field.resolve_id(&[(0, "success")]) {
                Some(0) if field.carries(TType::Struct) => {
                    result.success = Some(ContainerOfEnums::read(input)?);
                }
                _ => input.skip(field.field_type)?,
            }
            input.read_field_end()?;
        }
        input.read_struct_end()?;
        Ok(result)
    }

    fn write(&self, output: &mut dyn OutputProtocol) -> ProtocolResult<()> {
        output.write_struct_begin(&StructIdentifier::new("echo_result"))?;
        if let Some(success) = &self.success {
            output.write_field_begin(&FieldIdentifier::new("success", TType::Struct, 0))?;
            success.write(output)?;
            output.write_field_end()?;
        }
        output.write_field_stop()?;
        output.write_struct_end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::Protocol;

    fn full_message() -> ContainerOfEnums {
        ContainerOfEnums {
            first: Some(UndefinedValues::Two),
            second: Some(DefinedValues::Three),
            third: Some(HeterogeneousValues::Two),
            optional_fourth: Some(UndefinedValues::Three),
            optional_fifth: None,
            optional_sixth: Some(HeterogeneousValues(7)),
            status: Some(vec![Status::INACTIVE, Status::ACTIVE, Status::INACTIVE]),
            undefined_list: Some(vec![]),
            defined_set: Some(BTreeSet::from([DefinedValues::One, DefinedValues::Three])),
            heterogeneous_map: Some(BTreeMap::from([
                (HeterogeneousValues::One, DefinedValues::Two),
                (HeterogeneousValues::Three, DefinedValues(-4)),
            ])),
            ..ContainerOfEnums::default()
        }
    }

    fn encode(protocol: Protocol, value: &ContainerOfEnums) -> bytes::Bytes {
        let mut output = protocol.factory().output();
        value.write(output.as_mut()).unwrap();
        output.take_output()
    }

    fn decode(protocol: Protocol, bytes: &[u8]) -> ContainerOfEnums {
        let mut input = protocol.factory().input(bytes).unwrap();
        ContainerOfEnums::read(input.as_mut()).unwrap()
    }

    #[test]
    fn test_enum_codes() {
        assert_eq!(UndefinedValues::One.0, 0);
        assert_eq!(UndefinedValues::Three.0, 2);
        assert_eq!(DefinedValues::One.0, 1);
        assert_eq!(HeterogeneousValues::Two.0, 2);
        assert_eq!(HeterogeneousValues::Three.0, 3);
        assert_eq!(Status::ACTIVE.0, 1);
        assert_eq!(Status::INACTIVE.0, 2);
        assert_eq!(HeterogeneousValues::VALUES.len(), 3);
    }

    #[test]
    fn test_enum_display() {
        assert_eq!(Status::ACTIVE.to_string(), "ACTIVE");
        assert_eq!(HeterogeneousValues(1).to_string(), "1");
        assert_eq!(HeterogeneousValues(1).name(), None);
    }

    #[test]
    fn test_default_sets_defaulted_fields() {
        let value = ContainerOfEnums::default();
        assert_eq!(value.default_seventh, Some(UndefinedValues::One));
        assert_eq!(value.default_eighth, Some(DefinedValues::One));
        assert_eq!(value.default_nineth, Some(HeterogeneousValues::One));
        assert_eq!(value.first, None);
        assert_eq!(value.status, None);
    }

    #[test]
    fn test_value_identity_across_protocols() {
        let message = full_message();
        for protocol in Protocol::ALL {
            let bytes = encode(protocol, &message);
            assert_eq!(decode(protocol, &bytes), message, "protocol {protocol}");
        }
    }

    #[test]
    fn test_binary_status_bytes() {
        let message = ContainerOfEnums {
            status: Some(vec![Status::ACTIVE, Status::INACTIVE]),
            ..ContainerOfEnums::empty()
        };
        let bytes = encode(Protocol::Binary, &message);
        assert_eq!(
            &bytes[..],
            &[
                15, 0, 10, // field 10: list
                8, 0, 0, 0, 2, // i32 x 2
                0, 0, 0, 1, //
                0, 0, 0, 2, //
                0, // stop
            ]
        );

        let decoded = decode(Protocol::Binary, &bytes);
        assert_eq!(decoded, message);
        assert_eq!(encode(Protocol::Binary, &decoded), bytes);
    }

    #[test]
    fn test_simple_json_layout() {
        let message = ContainerOfEnums {
            first: Some(UndefinedValues::Two),
            status: Some(vec![Status::ACTIVE]),
            heterogeneous_map: Some(BTreeMap::from([(
                HeterogeneousValues::Three,
                DefinedValues::One,
            )])),
            ..ContainerOfEnums::empty()
        };
        let bytes = encode(Protocol::SimpleJson, &message);
        assert_eq!(
            std::str::from_utf8(&bytes).unwrap(),
            r#"{"first":1,"status":[1],"heterogeneousMap":{"3":1}}"#
        );
    }

    #[test]
    fn test_unknown_and_mistyped_fields_skipped() {
        let bytes = br#"{"1":{"str":"oops"},"2":{"i32":3},"42":{"lst":["i32",1,9]}}"#;
        let decoded = decode(Protocol::Json, bytes);
        assert_eq!(
            decoded,
            ContainerOfEnums {
                second: Some(DefinedValues::Three),
                ..ContainerOfEnums::empty()
            }
        );

        let decoded = decode(Protocol::SimpleJson, br#"{"unknown":[1,2],"third":3}"#);
        assert_eq!(decoded.third, Some(HeterogeneousValues::Three));
    }

    #[test]
    fn test_wrong_element_type_rejected() {
        let bytes = br#"{"10":{"lst":["str",1,"x"]}}"#;
        let mut input = Protocol::Json.factory().input(bytes).unwrap();
        assert!(ContainerOfEnums::read(input.as_mut()).is_err());
    }

    #[test]
    fn test_display_lists_set_fields() {
        let message = ContainerOfEnums {
            first: Some(UndefinedValues::One),
            status: Some(vec![Status::ACTIVE, Status::INACTIVE]),
            defined_set: Some(BTreeSet::from([DefinedValues::Two])),
            ..ContainerOfEnums::empty()
        };
        assert_eq!(
            message.to_string(),
            "ContainerOfEnums(first=One, status=[ACTIVE, INACTIVE], definedSet={Two})"
        );
    }

    #[test]
    fn test_echo_args_round_trip() {
        let args = EchoArgs {
            message: Some(full_message()),
        };
        for protocol in Protocol::ALL {
            let mut output = protocol.factory().output();
            args.write(output.as_mut()).unwrap();
            let bytes = output.take_output();
            let mut input = protocol.factory().input(&bytes).unwrap();
            assert_eq!(EchoArgs::read(input.as_mut()).unwrap(), args);
        }
    }
}
