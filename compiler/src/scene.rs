use crate::error::Location;
use crate::token::Reference;

macro_rules! named_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident),* $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),*
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),*];

            pub fn name(self) -> &'static str {
                match self {
                    $($name::$variant => stringify!($variant)),*
                }
            }

            pub fn from_name(name: &str) -> Option<Self> {
                $name::ALL.iter().copied().find(|v| v.name() == name)
            }

            /// Position in declaration order; also the on-disk tag.
            pub fn tag(self) -> u8 {
                self as u8
            }

            pub fn from_tag(tag: u8) -> Option<Self> {
                $name::ALL.get(tag as usize).copied()
            }
        }
    };
}

named_enum! {
    /// UI element kinds, in the order of their numeric codes.
    ElementKind {
        Button,
        Label,
        TextArea,
        Image,
        TextField,
        Checkbox,
        List,
        ScrollArea,
        Grid,
        LabeledList,
        Canvas,
        Sprite,
        PopupButton,
        Slider,
        Table,
        Box,
        Radio,
        TabBar,
        Separator,
        Spacer,
        Position,
        Timer,
    }
}

named_enum! {
    /// Attributes an element may carry.
    AttributeKind {
        Frame,
        AxisOrigin,
        Color,
        BackgroundColor,
        SelectionColor,
        BorderColor,
        Font,
        FontSize,
        HorizontalAlignment,
        VerticalAlignment,
        Action,
        Value,
        Hidden,
        Weight,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    None,
    PushScene(Reference),
    Function(String),
    Script(Reference),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x:      i64,
    pub y:      i64,
    pub width:  i64,
    pub height: i64,
}

/// A structured attribute value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementValue {
    Integer(i64),
    Text(String),
    Reference(Reference),
    Rect(Rect),
    Point { x: i64, y: i64 },
    Color(u32),
    Image(Reference),
    ImageList(Vec<Reference>),
    StringList(Vec<String>),
    /// A value looked up from another resource, with extra keyed values
    /// passed along to the lookup.
    Lookup {
        reference:   Reference,
        side_values: Vec<(String, ElementValue)>,
    },
    Action(Action),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneElement {
    pub kind:       ElementKind,
    pub id:         String,
    pub attributes: Vec<(AttributeKind, ElementValue)>,
    pub location:   Location,
}

impl SceneElement {
    pub fn attribute(&self, kind: AttributeKind) -> Option<&ElementValue> {
        self.attributes
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, value)| value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Background {
    #[default]
    None,
    Single(ElementValue),
    /// Start, middle and end pieces of a stretchable background.
    Stretch(Box<[ElementValue; 3]>),
}

/// A parsed `scene` or `dialog` block, ready for an interface encoder.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SceneInterface {
    pub dialog:     bool,
    pub title:      String,
    pub flags:      u16,
    pub size:       (i64, i64),
    pub frame:      Option<Rect>,
    pub background: Background,
    pub elements:   Vec<SceneElement>,
}
